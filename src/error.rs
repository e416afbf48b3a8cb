use thiserror::Error;

/// Failures returned to callers of the job engine.
///
/// A job whose process exits non-zero or is killed is not an error here; that
/// outcome is recorded on the job and read back through its status.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("invalid job request: {0}")]
    InvalidRequest(String),

    #[error("job failed to start: {0}")]
    Start(#[source] std::io::Error),

    #[error("job {0}: not found")]
    NotFound(String),

    #[error("job {id}: failed to terminate: {source}")]
    Termination {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("job {0}: id already in use")]
    DuplicateId(String),
}

pub type Result<T> = std::result::Result<T, JobError>;
