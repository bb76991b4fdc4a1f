use std::sync::PoisonError;

use skiff_server::actor::ActorSendError;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinError;

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("error in actor messaging: {0}")]
    ActorError(#[from] ActorSendError),
    #[error("invalid job: {0}")]
    InvalidJob(String),
    #[error("shuffle barrier timed out for stream {0}")]
    ShuffleTimeout(String),
    #[error("job failed: {0}")]
    JobFailed(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<JoinError> for ExecutionError {
    fn from(error: JoinError) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl<T> From<PoisonError<T>> for ExecutionError {
    fn from(error: PoisonError<T>) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl From<oneshot::error::RecvError> for ExecutionError {
    fn from(_: oneshot::error::RecvError) -> Self {
        ExecutionError::InternalError("reply channel closed".to_string())
    }
}
