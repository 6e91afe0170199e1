//! CrowdCompute Library
//!
//! This library crate defines the core modules of the distributed
//! task-execution framework. It serves as the foundation for the two
//! binaries: the coordinator server (`main.rs`) and the worker agent
//! (`bin/worker.rs`).
//!
//! ## Architecture Modules
//! The system is composed of four loosely coupled subsystems:
//!
//! - **`store`**: The artifact layer. A file-backed, append-only tree keyed
//!   by `(job_id, name)` holding job inputs, shard chunks, and task outputs,
//!   with temp-then-rename atomicity and SHA-256 content hashes.
//! - **`registry`**: The authoritative job/task state machine. Tracks jobs,
//!   tasks, leases, and workers in flat id-keyed tables, dispatches pending
//!   tasks FIFO, and chains the reduce stage of Map->Reduce jobs.
//! - **`api`**: The coordinator's HTTP surface: job submission and status
//!   for clients, claim/heartbeat/report and artifact transfer for workers.
//! - **`worker`**: The polling agent. Resolves plugin kinds to container
//!   invocations, stages inputs into a scratch directory, runs the plugin in
//!   an ephemeral sibling container, and uploads the outputs.

pub mod api;
pub mod error;
pub mod registry;
pub mod store;
pub mod worker;
