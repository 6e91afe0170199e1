//! Worker Agent Module
//!
//! The long-running agent that turns coordinator tasks into container runs.
//!
//! ## Execution Lifecycle
//! 1. **Poll**: `claim` the coordinator; back off exponentially when idle.
//! 2. **Resolve**: look the task's plugin kind up in the static descriptor
//!    table; unknown kinds are reported back as failures.
//! 3. **Stage**: download every declared input into a per-task scratch
//!    directory, verifying content hashes.
//! 4. **Run**: spawn a sibling container with the plugin image and the
//!    rendered argv, while a heartbeat loop keeps the lease alive. A
//!    `reassigned` heartbeat response kills the container and abandons the
//!    task.
//! 5. **Publish**: upload the declared outputs and report the outcome. Every
//!    execution error becomes a failure report, never an agent crash.
//!
//! ## Submodules
//! - **`plugins`**: plugin kind to container invocation mapping (image, argv
//!   template, I/O contract).
//! - **`runtime`**: the container runtime capability (spawn, wait, kill)
//!   implemented over the host's `docker` CLI, swappable for an in-process
//!   fake in tests.
//! - **`client`**: typed HTTP client for the coordinator API with retries.
//! - **`agent`**: the polling loop itself.
//! - **`config`**: environment-based agent configuration.

pub mod agent;
pub mod client;
pub mod config;
pub mod plugins;
pub mod runtime;
