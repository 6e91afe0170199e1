use thiserror::Error;

/// Coordinator-side error kinds that are surfaced to clients.
///
/// Worker-internal failures never use this type; they are converted into
/// failure reports (see `worker::agent`) so the agent itself keeps running.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unknown job: {0}")]
    JobUnknown(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
