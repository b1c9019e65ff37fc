use thiserror::Error;
use uuid::Uuid;

/// Errors from task tracking.
///
/// `NotFound` and `Abandoned` describe data conditions a coordinator can
/// recover from; `StorageSizeNotSet` and `InvalidState` indicate coordinator
/// bugs and are raised immediately.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task {0} is not tracked")]
    NotFound(Uuid),

    #[error("task {0} has no recorded storage size")]
    StorageSizeNotSet(Uuid),

    #[error("task {0} was abandoned; its results are discarded")]
    Abandoned(Uuid),

    #[error("invalid task state transition: {0}")]
    InvalidState(String),
}

/// Result alias for task operations.
pub type TaskResult<T> = Result<T, TaskError>;
