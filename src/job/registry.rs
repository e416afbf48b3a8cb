use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::job::{Job, JobStatus};

/// Authoritative map from job id to job.
///
/// Lookups share the read lock and never block each other; an insert holds
/// the write lock only for the map insertion itself. Jobs are never removed.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job under its id. Returns false, leaving the existing entry
    /// untouched, if the id is already taken.
    pub async fn put(&self, job: Arc<Job>) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.entry(job.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(job);
                true
            }
        }
    }

    /// Get a job by id
    pub async fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Jobs whose process has not been reaped yet
    pub async fn running(&self) -> Vec<Arc<Job>> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.status() == JobStatus::Running)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ExitOutcome, JobRequest, OutputSink};
    use tokio::sync::mpsc;

    fn job(id: &str) -> Arc<Job> {
        let (kill_tx, _kill_rx) = mpsc::channel(1);
        Arc::new(Job::new(
            id.to_string(),
            JobRequest::new("true", Vec::<String>::new()),
            Arc::new(OutputSink::new()),
            kill_tx,
        ))
    }

    #[tokio::test]
    async fn put_then_get() {
        let registry = JobRegistry::new();
        assert!(registry.is_empty().await);

        assert!(registry.put(job("a")).await);
        let found = registry.get("a").await.expect("job should be registered");
        assert_eq!(found.id(), "a");
        assert!(registry.get("b").await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn put_refuses_duplicate_ids() {
        let registry = JobRegistry::new();
        let first = job("a");
        assert!(registry.put(first.clone()).await);
        assert!(!registry.put(job("a")).await);

        let found = registry.get("a").await.unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn running_excludes_exited_jobs() {
        let registry = JobRegistry::new();
        let done = job("done");
        done.finish(ExitOutcome::Success);
        registry.put(done).await;
        registry.put(job("live")).await;

        let running = registry.running().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id(), "live");
    }

    #[tokio::test]
    async fn concurrent_readers_and_writers() {
        let registry = Arc::new(JobRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let id = format!("job-{i}");
                    registry.put(job(&id)).await;
                    for _ in 0..50 {
                        assert!(registry.get(&id).await.is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.len().await, 16);
    }
}
