use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{JobError, Result};
use crate::job::{
    IdGenerator, Job, JobRegistry, JobRequest, JobSnapshot, JobStatus, OutputSink, UuidGenerator,
};
use crate::worker::process::Process;
use crate::worker::watcher;

/// Pending kill requests per job. Stop callers beyond this wait for a slot.
const KILL_QUEUE_DEPTH: usize = 8;

/// The job engine: starts, stops and reports on jobs.
///
/// Owns the [`JobRegistry`]; share the worker itself (e.g. behind an `Arc`)
/// rather than the registry.
pub struct JobWorker {
    registry: JobRegistry,
    ids: Box<dyn IdGenerator>,
}

impl Default for JobWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobWorker {
    pub fn new() -> Self {
        Self::with_id_generator(UuidGenerator)
    }

    pub fn with_id_generator(ids: impl IdGenerator + 'static) -> Self {
        Self {
            registry: JobRegistry::new(),
            ids: Box::new(ids),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Start a job and return immediately with its initial snapshot.
    ///
    /// The job is registered only if its process started. The completion
    /// watcher is launched after registration, so a short-lived command may
    /// already report `Exited` in the returned snapshot.
    ///
    /// # Errors
    ///
    /// - [`JobError::InvalidRequest`] if the command is empty
    /// - [`JobError::Start`] if the process could not be started
    /// - [`JobError::DuplicateId`] if the id generator repeated an id; the
    ///   process that was started for it is killed
    pub async fn create(&self, request: JobRequest) -> Result<JobSnapshot> {
        request.validate()?;

        let id = self.ids.next_id();
        let output = Arc::new(OutputSink::new());
        let process = Process::spawn(&request, output.clone()).map_err(|e| {
            tracing::error!(command = %request.command, error = %e, "job failed to start");
            JobError::Start(e)
        })?;

        let (kill_tx, kill_rx) = mpsc::channel(KILL_QUEUE_DEPTH);
        let job = Arc::new(Job::new(id.clone(), request, output, kill_tx));
        tracing::info!(
            job_id = %id,
            pid = ?process.pid(),
            command = %job.request().command,
            args = ?job.request().args,
            "job started"
        );

        let registered = self.registry.put(job.clone()).await;
        watcher::spawn(job.clone(), process, kill_rx);

        if !registered {
            tracing::error!(job_id = %id, "job id already in use, terminating new process");
            if let Err(e) = job.request_kill().await {
                tracing::warn!(job_id = %id, error = %e, "failed to terminate unregistered process");
            }
            return Err(JobError::DuplicateId(id));
        }

        Ok(job.snapshot().await)
    }

    /// Force-stop a job and wait until it has exited.
    ///
    /// Stopping a job that already exited succeeds without touching its
    /// recorded outcome.
    ///
    /// # Errors
    ///
    /// - [`JobError::NotFound`] for an unknown id
    /// - [`JobError::Termination`] if the kill signal could not be delivered
    pub async fn stop(&self, id: &str) -> Result<()> {
        let job = self.lookup(id).await?;
        if job.status() == JobStatus::Exited {
            tracing::info!(job_id = %id, "job already exited");
            return Ok(());
        }

        job.request_kill().await.map_err(|source| {
            tracing::error!(job_id = %id, error = %source, "job failed to terminate");
            JobError::Termination {
                id: id.to_string(),
                source,
            }
        })?;

        job.wait_exited().await;
        tracing::info!(job_id = %id, "job terminated");
        Ok(())
    }

    /// Snapshot of a job's status, outcome and output so far.
    ///
    /// # Errors
    ///
    /// [`JobError::NotFound`] for an unknown id.
    pub async fn status(&self, id: &str) -> Result<JobSnapshot> {
        let job = self.lookup(id).await?;
        Ok(job.snapshot().await)
    }

    /// Stop every running job. Returns how many were signaled.
    ///
    /// Kill requests go out to all jobs before waiting on any of them.
    pub async fn stop_all(&self) -> usize {
        let running = self.registry.running().await;

        let mut signaled = Vec::with_capacity(running.len());
        for job in running {
            match job.request_kill().await {
                Ok(()) => signaled.push(job),
                Err(e) => {
                    tracing::warn!(job_id = %job.id(), error = %e, "failed to terminate job")
                }
            }
        }

        for job in &signaled {
            job.wait_exited().await;
        }
        signaled.len()
    }

    async fn lookup(&self, id: &str) -> Result<Arc<Job>> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }
}
