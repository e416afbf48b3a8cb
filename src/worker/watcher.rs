use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::job::model::KillReply;
use crate::job::{ExitOutcome, Job};
use crate::worker::process::Process;

/// Spawn the completion watcher for a registered job.
///
/// The watcher takes sole ownership of `process`: it is the only task that
/// waits on it, and it performs kills on behalf of `stop` through `kill_rx`.
/// When the process exits it drains the output, records the outcome and
/// releases the job's completion signal.
pub fn spawn(
    job: Arc<Job>,
    process: Process,
    kill_rx: mpsc::Receiver<KillReply>,
) -> JoinHandle<()> {
    // Built before the task so it is dropped, and finalizes, even if the task
    // is cancelled before its first poll.
    let guard = FinalizeOnDrop(job.clone());
    tokio::spawn(async move {
        let outcome = watch(&job, process, kill_rx).await;
        match outcome.error_message() {
            None => tracing::info!(job_id = %job.id(), "job finished successfully"),
            Some(reason) => {
                tracing::info!(job_id = %job.id(), reason = %reason, "job finished with error")
            }
        }
        job.finish(outcome);

        drop(guard);
    })
}

async fn watch(
    job: &Job,
    mut process: Process,
    mut kill_rx: mpsc::Receiver<KillReply>,
) -> ExitOutcome {
    let status = loop {
        tokio::select! {
            status = process.wait() => break status,
            Some(reply) = kill_rx.recv() => {
                let result = process.kill();
                match &result {
                    Ok(()) => tracing::debug!(job_id = %job.id(), "kill signal sent"),
                    Err(e) => tracing::error!(job_id = %job.id(), error = %e, "failed to signal process"),
                }
                // The requester may have given up; nothing to do then.
                let _ = reply.send(result);
            }
        }
    };

    let outcome = match status {
        Ok(status) => ExitOutcome::from_exit_status(status),
        Err(e) => {
            tracing::error!(job_id = %job.id(), error = %e, "failed to wait for process");
            ExitOutcome::Lost(format!("failed to wait for process: {}", e))
        }
    };

    process.drain_output().await;
    job.output().close().await;
    outcome
}

/// Finalizes the job if the watcher unwinds before recording an outcome, so
/// a fault stays confined to this job and `stop` callers are released.
struct FinalizeOnDrop(Arc<Job>);

impl Drop for FinalizeOnDrop {
    fn drop(&mut self) {
        let aborted = ExitOutcome::Lost("completion watcher aborted".to_string());
        if self.0.finish(aborted) {
            tracing::error!(job_id = %self.0.id(), "completion watcher aborted, job marked as lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobRequest, JobStatus, OutputSink};

    fn start(request: JobRequest) -> (Arc<Job>, JoinHandle<()>) {
        let sink = Arc::new(OutputSink::new());
        let process = Process::spawn(&request, sink.clone()).unwrap();
        let (kill_tx, kill_rx) = mpsc::channel(4);
        let job = Arc::new(Job::new("w-1".to_string(), request, sink, kill_tx));
        let handle = spawn(job.clone(), process, kill_rx);
        (job, handle)
    }

    #[tokio::test]
    async fn records_success_and_closes_output() {
        let (job, handle) = start(JobRequest::new("echo", ["done"]));
        handle.await.unwrap();

        let snapshot = job.snapshot().await;
        assert_eq!(snapshot.status, JobStatus::Exited);
        assert_eq!(snapshot.outcome, Some(ExitOutcome::Success));
        assert_eq!(snapshot.output, "done\n");
        assert!(job.output().is_closed().await);
    }

    #[tokio::test]
    async fn records_non_zero_exit() {
        let (job, handle) = start(JobRequest::new("sh", ["-c", "exit 7"]));
        handle.await.unwrap();
        assert_eq!(job.state().outcome, Some(ExitOutcome::ExitCode(7)));
    }

    #[tokio::test]
    async fn kill_request_terminates_process() {
        let (job, handle) = start(JobRequest::new("sleep", ["30"]));

        job.request_kill().await.unwrap();
        job.wait_exited().await;
        handle.await.unwrap();

        assert_eq!(job.state().outcome, Some(ExitOutcome::Signaled(9)));
    }

    #[tokio::test]
    async fn aborted_watcher_still_releases_waiters() {
        let (job, handle) = start(JobRequest::new("sleep", ["30"]));

        handle.abort();
        let _ = handle.await;

        job.wait_exited().await;
        assert!(matches!(job.state().outcome, Some(ExitOutcome::Lost(_))));
    }
}
