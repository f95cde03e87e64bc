//! Single-writer generation worker.
//!
//! The worker claims one job at a time, invokes the generator under a
//! deadline, persists a successful result as the owner's sandbox adapter
//! and hot-loads it into the registry. Generators are external
//! collaborators behind [`AdapterGenerator`]; the shipped default emits a
//! deterministic manifest skeleton the owner can flesh out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agenr_domain::error::{Error, Result};
use agenr_store::Store;

use crate::jobs::{self, GenerationJobRow};
use crate::lifecycle::{self, AdapterPaths};
use crate::registry::AdapterRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generator boundary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Streams progress lines into a job's append-only log.
#[derive(Clone)]
pub struct JobLogger {
    store: Store,
    job_id: String,
}

impl JobLogger {
    pub fn new(store: Store, job_id: String) -> Self {
        Self { store, job_id }
    }

    /// Append one line. Log failures never fail the job.
    pub fn append(&self, line: &str) {
        if let Err(e) = jobs::append_log(&self.store, &self.job_id, line) {
            tracing::warn!(job_id = %self.job_id, error = %e, "job log append failed");
        }
    }
}

/// Produces adapter manifest source for a platform.
#[async_trait]
pub trait AdapterGenerator: Send + Sync {
    async fn generate(&self, platform: &str, logger: &JobLogger) -> Result<String>;
}

/// Deterministic fallback generator: a valid manifest skeleton with no
/// operations, ready for the owner to edit and re-upload.
pub struct ManifestSkeletonGenerator;

#[async_trait]
impl AdapterGenerator for ManifestSkeletonGenerator {
    async fn generate(&self, platform: &str, logger: &JobLogger) -> Result<String> {
        logger.append("generating manifest skeleton");
        Ok(format!(
            r#"[adapter]
platform = "{platform}"
version = "0.1.0"
display_name = "{platform}"
description = "Generated skeleton — fill in base_url, domains and operations."

[auth]
type = "api_key"

[domains]
allowed = []
authenticated = []
"#
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct JobWorker {
    store: Store,
    registry: Arc<AdapterRegistry>,
    paths: AdapterPaths,
    generator: Arc<dyn AdapterGenerator>,
    poll_interval: Duration,
    generator_timeout: Duration,
}

impl JobWorker {
    pub fn new(
        store: Store,
        registry: Arc<AdapterRegistry>,
        paths: AdapterPaths,
        generator: Arc<dyn AdapterGenerator>,
        poll_interval: Duration,
        generator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            paths,
            generator,
            poll_interval,
            generator_timeout,
        }
    }

    /// Poll loop. Runs until the process exits.
    pub async fn run(self) {
        tracing::info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            "generation worker started"
        );
        loop {
            match self.run_once().await {
                Ok(true) => {} // processed a job — poll again immediately
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    tracing::warn!(error = %e, "generation worker tick failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Claim and process at most one job. Returns whether one was claimed.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = jobs::claim_next_job(&self.store)? else {
            return Ok(false);
        };
        let logger = JobLogger::new(self.store.clone(), job.id.clone());
        logger.append(&format!("claimed job for platform '{}'", job.platform));

        match self.process(&job, &logger).await {
            Ok(result) => {
                jobs::complete_job(&self.store, &job.id, &result)?;
                logger.append("job complete");
            }
            Err(e) => {
                jobs::fail_job(&self.store, &job.id, &e.to_string())?;
                logger.append(&format!("job failed: {e}"));
            }
        }
        Ok(true)
    }

    async fn process(&self, job: &GenerationJobRow, logger: &JobLogger) -> Result<serde_json::Value> {
        let generated = tokio::time::timeout(
            self.generator_timeout,
            self.generator.generate(&job.platform, logger),
        )
        .await
        .map_err(|_| Error::Transient("generator deadline exceeded".into()))??;

        let owner = job.owner_key_id.as_deref().unwrap_or(lifecycle::SYSTEM_OWNER);
        logger.append("persisting generated adapter to sandbox");
        let row = lifecycle::upload(&self.store, &self.paths, &job.platform, owner, &generated)?;

        // Hot-load the scoped factory so the owner can use it immediately.
        self.registry.sync(&self.store)?;

        Ok(serde_json::json!({
            "platform": row.platform,
            "owner_id": row.owner_id,
            "source_hash": row.source_hash,
            "file_path": row.file_path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;

    struct FailingGenerator;

    #[async_trait]
    impl AdapterGenerator for FailingGenerator {
        async fn generate(&self, _platform: &str, logger: &JobLogger) -> Result<String> {
            logger.append("about to fail");
            Err(Error::Transient("generator upstream unavailable".into()))
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl AdapterGenerator for SlowGenerator {
        async fn generate(&self, _platform: &str, _logger: &JobLogger) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    fn worker_with(generator: Arc<dyn AdapterGenerator>) -> (JobWorker, Store, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let registry = Arc::new(AdapterRegistry::new(Duration::from_secs(5)).unwrap());
        let paths = AdapterPaths::new(tmp.path().join("runtime"));
        let worker = JobWorker::new(
            store.clone(),
            registry,
            paths,
            generator,
            Duration::from_millis(50),
            Duration::from_millis(500),
        );
        (worker, store, tmp)
    }

    #[tokio::test]
    async fn empty_queue_is_a_quiet_tick() {
        let (worker, _store, _tmp) = worker_with(Arc::new(ManifestSkeletonGenerator));
        assert!(!worker.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn successful_generation_lands_in_sandbox() {
        let (worker, store, _tmp) = worker_with(Arc::new(ManifestSkeletonGenerator));
        let job = jobs::enqueue(&store, "toast", Some("key-1")).unwrap();

        assert!(worker.run_once().await.unwrap());

        let row = jobs::get_job(&store, &job.id, None).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Complete);
        assert!(row.logs.iter().any(|l| l.contains("claimed")));
        assert!(row.logs.iter().any(|l| l == "job complete"));
        assert_eq!(row.result.as_ref().unwrap()["platform"], "toast");

        let adapter = lifecycle::get(&store, "toast", "key-1").unwrap().unwrap();
        assert_eq!(adapter.status, lifecycle::AdapterStatus::Sandbox);
        assert!(std::path::Path::new(&adapter.file_path).exists());
    }

    #[tokio::test]
    async fn generator_failure_fails_the_job() {
        let (worker, store, _tmp) = worker_with(Arc::new(FailingGenerator));
        let job = jobs::enqueue(&store, "toast", Some("key-1")).unwrap();

        assert!(worker.run_once().await.unwrap());

        let row = jobs::get_job(&store, &job.id, None).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert!(row.error.as_ref().unwrap().contains("unavailable"));
        assert!(lifecycle::get(&store, "toast", "key-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn poll_loop_drains_the_queue() {
        let (worker, store, _tmp) = worker_with(Arc::new(ManifestSkeletonGenerator));
        let first = jobs::enqueue(&store, "toast", Some("key-1")).unwrap();
        let second = jobs::enqueue(&store, "square", Some("key-1")).unwrap();

        tokio::spawn(worker.run());

        // Both jobs complete within a few poll cycles.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let a = jobs::get_job(&store, &first.id, None).unwrap().unwrap();
            let b = jobs::get_job(&store, &second.id, None).unwrap().unwrap();
            if a.status == JobStatus::Complete && b.status == JobStatus::Complete {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "worker did not drain the queue: {a:?} {b:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn generator_deadline_is_enforced() {
        let (worker, store, _tmp) = worker_with(Arc::new(SlowGenerator));
        let job = jobs::enqueue(&store, "toast", None).unwrap();

        assert!(worker.run_once().await.unwrap());

        let row = jobs::get_job(&store, &job.id, None).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert!(row.error.as_ref().unwrap().contains("deadline"));
    }
}
