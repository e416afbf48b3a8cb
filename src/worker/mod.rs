//! Process execution for jobs.
//!
//! This module runs job processes on the local host:
//! - **Process control**: spawns the command with stdout/stderr piped into the
//!   job's [`OutputSink`](crate::job::OutputSink)
//! - **Completion watching**: one task per job owns the process, reaps it and
//!   records the outcome
//! - **Engine**: [`JobWorker`] composes the two with the registry into the
//!   create / stop / status operations
//!
//! # Execution Flow
//!
//! 1. [`JobWorker::create`] spawns the process and registers the job
//! 2. The watcher waits for exit, servicing kill requests meanwhile
//! 3. On exit it drains output, records the [`ExitOutcome`](crate::job::ExitOutcome)
//!    and releases the job's completion signal
//! 4. [`JobWorker::stop`] sends a kill request and waits on that signal
//!
//! # Security Note
//!
//! Commands run with the server's own privileges and without sandboxing.

pub mod engine;
pub mod process;
pub mod watcher;

pub use engine::JobWorker;
