//! Job/Task Registry Module
//!
//! The coordinator's authoritative state machine. Jobs, tasks, and workers
//! live in three flat in-memory tables; entities reference each other by id
//! only, never by pointer.
//!
//! ## Architecture Overview
//! The registry follows a **Pull-based** model with **Lease** management:
//! 1. **Submission**: a job is installed together with its initial tasks
//!    (one `single` task, or N `map` tasks over the sharded input).
//! 2. **Dispatch**: workers poll `claim`; the oldest `Pending` task is handed
//!    out with a lease. At most one worker ever holds a task.
//! 3. **Leasing**: heartbeats extend the lease. The background sweeper
//!    returns silently-held tasks to `Pending` and bumps their retry count.
//! 4. **Chaining**: when the last map task of a `map_reduce` job succeeds,
//!    the registry creates the reduce task over the map outputs in shard
//!    order.
//!
//! ## Submodules
//! - **`types`**: ids, states, leases, and the wire-visible summaries.
//! - **`registry`**: the tables and every state transition, serialized under
//!   a single lock.
//! - **`shard`**: deterministic line-boundary sharding of a job input.
//! - **`sweeper`**: the periodic lease-expiry and worker-liveness pass.

pub mod registry;
pub mod shard;
pub mod sweeper;
pub mod types;

#[cfg(test)]
mod tests;
