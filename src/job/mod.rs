//! Job data model and shared state.
//!
//! - [`Job`]: one managed process, its request, status and outcome
//! - [`OutputSink`]: combined stdout/stderr capture with prefix-stable snapshots
//! - [`JobRegistry`]: the id to job map shared by every engine operation
//! - [`IdGenerator`]: source of unique job ids
//!
//! Processes are started and observed by [`crate::worker`].

pub mod id;
pub mod model;
pub mod output;
pub mod registry;

pub use id::{IdGenerator, UuidGenerator};
pub use model::{ExitOutcome, Job, JobRequest, JobSnapshot, JobState, JobStatus};
pub use output::OutputSink;
pub use registry::JobRegistry;
