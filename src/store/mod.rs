//! Artifact Store Module
//!
//! File-backed storage for every blob a job owns: uploaded inputs, the shard
//! chunks produced at submit time, per-task outputs, and the final output.
//!
//! ## Core Concepts
//! - **Keying**: artifacts are addressed by `(job_id, name)`; every job gets
//!   its own directory under the storage root.
//! - **Atomicity**: writers stage into a `.tmp-<name>-<nonce>` sibling file and
//!   rename it into place, so readers never observe partial bytes.
//! - **Immutability**: once finalized an artifact cannot be replaced; a second
//!   `put` for the same name is a `Conflict`.
//! - **Integrity**: a SHA-256 content hash is recorded at write time and
//!   returned to readers for end-to-end verification.

pub mod files;

#[cfg(test)]
mod tests;
