//! Task entity and lifecycle tracking for chronik.
//!
//! A [`Task`] models one unit of extraction work dispatched to a worker,
//! with its own private store. The [`TaskManager`] tracks activity through
//! heartbeats, detects abandonment by inactivity, arbitrates which finished
//! task merges next, and creates linked retries for abandoned work.

pub mod error;
pub mod manager;
pub mod task;

pub use error::{TaskError, TaskResult};
pub use manager::{TaskManager, DEFAULT_INACTIVITY_TIMEOUT};
pub use task::Task;
