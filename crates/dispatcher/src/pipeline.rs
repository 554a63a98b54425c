//! Per-job capture pipeline: deterministic tier first, adaptive fallback
//! when any deterministic step fails.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use capture_engine::{artifact_key, ArtifactStore, CaptureEngine, CapturePath};
use fallback_agent::FallbackAgent;
use inboxshot_core_types::{ArtifactId, PipelineError, VisualMode};
use mail_locator::EmailLocator;
use run_store::{ArtifactRow, RunStore};
use session_broker::{PageDriver, SessionProvider};

use crate::job::JobPayload;
use crate::metrics;

pub struct JobPipeline {
    sessions: Arc<dyn SessionProvider>,
    locator: EmailLocator,
    capture: CaptureEngine,
    fallback: FallbackAgent,
    artifacts: Arc<dyn ArtifactStore>,
    runs: Arc<dyn RunStore>,
}

impl JobPipeline {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        locator: EmailLocator,
        capture: CaptureEngine,
        fallback: FallbackAgent,
        artifacts: Arc<dyn ArtifactStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            sessions,
            locator,
            capture,
            fallback,
            artifacts,
            runs,
        }
    }

    /// Open the job's message and store one screenshot per color scheme.
    ///
    /// Any failure past session acquisition, whether in locating, capture
    /// or upload, hands the job to the fallback tier on a fresh session
    /// within the same attempt. The session lease is released on every
    /// exit path.
    pub async fn execute(&self, job: &JobPayload) -> Result<(), PipelineError> {
        let provider = job.pair.provider;
        let engine = job.pair.engine;

        let lease = self.sessions.acquire(provider, engine).await?;
        let page = lease.page();
        let deterministic = match self.locator.locate(&page, provider, &job.hint).await {
            Ok(()) => self.capture_pair(job, &page, CapturePath::Primary).await,
            Err(err) => Err(err),
        };
        lease.release().await;

        match deterministic {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(target: "dispatcher", job = %job.job_id, %provider,
                      kind = ?err.kind, error = %err.message,
                      "deterministic tier failed; switching to fallback");
                self.run_fallback(job).await
            }
        }
    }

    /// Adaptive tier: fresh session, planner-driven opening, fallback-keyed
    /// artifacts so deterministic captures are never overwritten.
    async fn run_fallback(&self, job: &JobPayload) -> Result<(), PipelineError> {
        metrics::record_fallback_used();
        let lease = self
            .sessions
            .acquire(job.pair.provider, job.pair.engine)
            .await?;
        let page = lease.page();

        let opened = self
            .fallback
            .open_message(&page, job.pair.provider, job.needle())
            .await;
        let result = match opened {
            Ok(()) => self.capture_pair(job, &page, CapturePath::Fallback).await,
            Err(err) => Err(err),
        };
        lease.release().await;
        result
    }

    async fn capture_pair(
        &self,
        job: &JobPayload,
        page: &Arc<dyn PageDriver>,
        path: CapturePath,
    ) -> Result<(), PipelineError> {
        for mode in VisualMode::ALL {
            let bytes = self.capture.capture(page, job.pair.provider, mode).await?;
            let key = artifact_key(job.job_id, mode, path);
            let stored = self.artifacts.put(&key, bytes).await?;
            self.runs
                .insert_artifact(ArtifactRow {
                    id: ArtifactId::new(),
                    run_id: job.run_id,
                    job_id: job.job_id,
                    pair: job.pair,
                    mode,
                    fallback: matches!(path, CapturePath::Fallback),
                    key: stored.key,
                    url: stored.url,
                    created_at: Utc::now(),
                })
                .await?;
        }
        info!(target: "dispatcher", job = %job.job_id, ?path, "both schemes captured");
        Ok(())
    }
}
