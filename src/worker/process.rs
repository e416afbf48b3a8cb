use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::job::{JobRequest, OutputSink};

/// How long to keep reading output after the process exits. A background
/// grandchild can hold the pipes open indefinitely.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

const PUMP_BUFFER_SIZE: usize = 8 * 1024;

/// A started OS process with stdout and stderr pumped into one sink.
///
/// Whoever holds this value is the only party allowed to wait on the
/// process. The child is killed if this is dropped before it exits.
#[derive(Debug)]
pub struct Process {
    child: Child,
    pumps: Vec<JoinHandle<()>>,
}

impl Process {
    /// Start `request` with both output streams appended to `sink`.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if the executable is missing or cannot be run.
    pub fn spawn(request: &JobRequest, sink: Arc<OutputSink>) -> io::Result<Self> {
        let mut child = Command::new(&request.command)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, sink.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, sink)));
        }

        Ok(Self { child, pumps })
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Send SIGKILL. Does not wait for the process to exit.
    pub fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    /// Wait for the process to exit and reap it. Cancel safe.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Wait for both pumps to reach end of stream, giving up after
    /// [`DRAIN_GRACE`] in total.
    pub async fn drain_output(&mut self) {
        let deadline = Instant::now() + DRAIN_GRACE;
        for mut pump in self.pumps.drain(..) {
            match tokio::time::timeout_at(deadline, &mut pump).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "output pump failed"),
                Err(_) => {
                    tracing::warn!("output still open after process exit, detaching");
                    pump.abort();
                }
            }
        }
    }
}

async fn pump<R>(mut reader: R, sink: Arc<OutputSink>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink.append(&buf[..n]).await,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read process output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let sink = Arc::new(OutputSink::new());
        let request = JobRequest::new("sh", ["-c", "echo out; echo err >&2"]);
        let mut process = Process::spawn(&request, sink.clone()).unwrap();

        let status = process.wait().await.unwrap();
        process.drain_output().await;

        assert!(status.success());
        let output = sink.snapshot().await;
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
    }

    #[tokio::test]
    async fn drain_gives_up_after_one_grace_period() {
        let sink = Arc::new(OutputSink::new());
        let request = JobRequest::new("sh", ["-c", "sleep 10 & echo hi"]);
        let mut process = Process::spawn(&request, sink.clone()).unwrap();
        process.wait().await.unwrap();

        let started = Instant::now();
        process.drain_output().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= DRAIN_GRACE);
        assert!(elapsed < DRAIN_GRACE + Duration::from_secs(1), "took {:?}", elapsed);
        assert_eq!(sink.snapshot().await, "hi\n");
    }

    #[tokio::test]
    async fn spawn_fails_for_missing_executable() {
        let sink = Arc::new(OutputSink::new());
        let request = JobRequest::new("definitely-not-a-real-binary-1234", Vec::<String>::new());
        let err = Process::spawn(&request, sink).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn kill_then_wait_reports_signal() {
        let sink = Arc::new(OutputSink::new());
        let request = JobRequest::new("sleep", ["30"]);
        let mut process = Process::spawn(&request, sink).unwrap();
        assert!(process.pid().is_some());

        process.kill().unwrap();
        let status = process.wait().await.unwrap();
        assert!(!status.success());
        assert!(status.code().is_none());
        assert!(process.pid().is_none());
    }
}
