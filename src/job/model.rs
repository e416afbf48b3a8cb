use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::JobError;
use crate::job::OutputSink;

/// Reply channel for a kill request; carries the signal delivery result.
pub(crate) type KillReply = oneshot::Sender<io::Result<()>>;

/// A command to run and its arguments. The command is executed directly,
/// not through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub command: String,
    pub args: Vec<String>,
}

impl JobRequest {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.command.trim().is_empty() {
            return Err(JobError::InvalidRequest(
                "command cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Exited,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Exited => write!(f, "EXITED"),
        }
    }
}

/// How a job's process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Exited on its own with a non-zero code.
    ExitCode(i32),
    /// Terminated by the given signal number.
    Signaled(i32),
    /// The exit could not be observed.
    Lost(String),
}

impl ExitOutcome {
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if status.success() {
            return ExitOutcome::Success;
        }
        if let Some(code) = status.code() {
            return ExitOutcome::ExitCode(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signaled(signal);
            }
        }
        ExitOutcome::Lost(format!("unrecognized exit status: {}", status))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Success => Some(0),
            ExitOutcome::ExitCode(code) => Some(*code),
            _ => None,
        }
    }

    /// Rendered failure message, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ExitOutcome::Success => None,
            ExitOutcome::ExitCode(code) => Some(format!("exit status {}", code)),
            ExitOutcome::Signaled(signal) => Some(match signal_description(*signal) {
                Some(description) => format!("signal: {}", description),
                None => format!("signal: {}", signal),
            }),
            ExitOutcome::Lost(reason) => Some(format!("job lost: {}", reason)),
        }
    }
}

fn signal_description(signal: i32) -> Option<&'static str> {
    let description = match signal {
        1 => "hangup",
        2 => "interrupt",
        3 => "quit",
        4 => "illegal instruction",
        6 => "aborted",
        8 => "floating point exception",
        9 => "killed",
        11 => "segmentation fault",
        13 => "broken pipe",
        14 => "alarm clock",
        15 => "terminated",
        _ => return None,
    };
    Some(description)
}

/// Mutable part of a job, written only by its completion watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub status: JobStatus,
    pub outcome: Option<ExitOutcome>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    fn running() -> Self {
        Self {
            status: JobStatus::Running,
            outcome: None,
            finished_at: None,
        }
    }

    pub fn is_exited(&self) -> bool {
        self.status == JobStatus::Exited
    }
}

/// One managed process and its tracked outcome.
///
/// The state lives in a `watch` channel created together with the job, so the
/// completion signal exists before the job can be seen by anyone else.
/// Publishing the terminal state and waking `stop` callers is one operation.
///
/// The process handle itself is not here: the completion watcher owns it, and
/// the job only keeps a channel for asking the watcher to kill it.
#[derive(Debug)]
pub struct Job {
    id: String,
    request: JobRequest,
    created_at: DateTime<Utc>,
    output: Arc<OutputSink>,
    state: watch::Sender<JobState>,
    kill_tx: mpsc::Sender<KillReply>,
}

impl Job {
    pub(crate) fn new(
        id: String,
        request: JobRequest,
        output: Arc<OutputSink>,
        kill_tx: mpsc::Sender<KillReply>,
    ) -> Self {
        let (state, _) = watch::channel(JobState::running());
        Self {
            id,
            request,
            created_at: Utc::now(),
            output,
            state,
            kill_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn status(&self) -> JobStatus {
        self.state.borrow().status
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    pub(crate) fn output(&self) -> &OutputSink {
        &self.output
    }

    /// Record the terminal outcome and release every waiter.
    ///
    /// Only the first call has any effect; returns whether this call did the
    /// transition.
    pub(crate) fn finish(&self, outcome: ExitOutcome) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_exited() {
                return false;
            }
            state.status = JobStatus::Exited;
            state.outcome = Some(outcome);
            state.finished_at = Some(Utc::now());
            true
        })
    }

    /// Wait until the job has reached `Exited`. Returns immediately if it
    /// already has.
    pub(crate) async fn wait_exited(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this can't observe a close.
        let _ = rx.wait_for(JobState::is_exited).await;
    }

    /// Ask the completion watcher to kill the process.
    ///
    /// If the watcher has already reaped the process, the request is dropped
    /// and this reports success: there is nothing left to signal.
    pub(crate) async fn request_kill(&self) -> io::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.kill_tx.send(reply_tx).await.is_err() {
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }

    /// Value copy of the job, with output read at call time.
    pub async fn snapshot(&self) -> JobSnapshot {
        // State first: once it reads Exited the sink is already closed, so the
        // output below is final.
        let state = self.state();
        let output = self.output.snapshot().await;
        JobSnapshot {
            id: self.id.clone(),
            request: self.request.clone(),
            status: state.status,
            outcome: state.outcome,
            output,
            created_at: self.created_at,
            finished_at: state.finished_at,
        }
    }
}

/// Point-in-time copy of a job handed to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: String,
    pub request: JobRequest,
    pub status: JobStatus,
    pub outcome: Option<ExitOutcome>,
    pub output: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// Rendered failure message; `None` while running or after success.
    pub fn error(&self) -> Option<String> {
        self.outcome.as_ref().and_then(ExitOutcome::error_message)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.outcome.as_ref().and_then(ExitOutcome::exit_code)
    }
}
