//! Folds per-job outcomes into the run row.

use std::sync::Arc;

use tracing::{info, warn};

use inboxshot_core_types::{PipelineError, RunId};

use crate::model::RunStatus;
use crate::store::RunStore;

/// Applies job outcomes to the owning run.
///
/// Completion is count-based: a run flips to `Done` when its artifact rows
/// reach `expected_artifacts`. A job that exhausts its attempts flips the
/// run to `Error` regardless of how many sibling jobs succeeded, unless the
/// run is already terminal.
#[derive(Clone)]
pub struct RunAggregator {
    store: Arc<dyn RunStore>,
}

impl RunAggregator {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// First job of a run picked up: surface progress on the run row.
    pub async fn job_started(&self, run_id: RunId) -> Result<(), PipelineError> {
        self.store.mark_running(run_id).await
    }

    /// A job stored all of its artifacts. Recounts and finishes the run if
    /// the threshold is met. Recounting (rather than incrementing) keeps
    /// retried jobs that re-uploaded artifacts from finishing a run early.
    pub async fn job_succeeded(&self, run_id: RunId) -> Result<RunStatus, PipelineError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| PipelineError::run_missing(format!("run {run_id} not found")))?;

        let count = self.store.artifact_count(run_id).await?;
        if count >= run.expected_artifacts {
            let status = self.store.try_finish(run_id).await?;
            info!(target: "run-store", run = %run_id, artifacts = count, ?status, "run complete");
            Ok(status)
        } else {
            info!(target: "run-store", run = %run_id, artifacts = count,
                  expected = run.expected_artifacts, "run still in progress");
            Ok(run.status)
        }
    }

    /// A job ran out of attempts. The run is failed even if other jobs
    /// already delivered their artifacts.
    pub async fn job_failed_terminally(
        &self,
        run_id: RunId,
        message: &str,
    ) -> Result<RunStatus, PipelineError> {
        let status = self.store.mark_error(run_id, message).await?;
        if status == RunStatus::Error {
            warn!(target: "run-store", run = %run_id, error = message, "run failed");
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactRow, Run};
    use crate::store::MemoryRunStore;
    use chrono::Utc;
    use inboxshot_core_types::{ArtifactId, Engine, JobId, Provider, ProviderPair, VisualMode};

    fn setup() -> (Arc<MemoryRunStore>, RunAggregator, RunId) {
        let store = Arc::new(MemoryRunStore::new());
        let aggregator = RunAggregator::new(store.clone());
        let id = RunId::new();
        (store, aggregator, id)
    }

    async fn seed(store: &MemoryRunStore, id: RunId, expected: u32) {
        store
            .insert_run(Run::new(id, "email-1", "v1", expected))
            .await
            .unwrap();
    }

    async fn add_artifact(store: &MemoryRunStore, run_id: RunId) {
        store
            .insert_artifact(ArtifactRow {
                id: ArtifactId::new(),
                run_id,
                job_id: JobId::new(),
                pair: ProviderPair::new(Provider::Gmail, Engine::Chromium),
                mode: VisualMode::Light,
                fallback: false,
                key: format!("screenshots/{}-light.png", JobId::new()),
                url: "memory://x".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn run_finishes_only_at_the_expected_count() {
        let (store, aggregator, id) = setup();
        seed(&store, id, 4).await;
        aggregator.job_started(id).await.unwrap();

        add_artifact(&store, id).await;
        add_artifact(&store, id).await;
        assert_eq!(
            aggregator.job_succeeded(id).await.unwrap(),
            RunStatus::Running
        );

        add_artifact(&store, id).await;
        add_artifact(&store, id).await;
        assert_eq!(aggregator.job_succeeded(id).await.unwrap(), RunStatus::Done);
    }

    #[tokio::test]
    async fn duplicate_retry_artifacts_exceeding_the_count_still_finish() {
        let (store, aggregator, id) = setup();
        seed(&store, id, 2).await;

        for _ in 0..3 {
            add_artifact(&store, id).await;
        }
        assert_eq!(aggregator.job_succeeded(id).await.unwrap(), RunStatus::Done);
    }

    #[tokio::test]
    async fn terminal_failure_wins_over_partial_success() {
        let (store, aggregator, id) = setup();
        seed(&store, id, 4).await;

        add_artifact(&store, id).await;
        add_artifact(&store, id).await;
        aggregator.job_succeeded(id).await.unwrap();

        let status = aggregator
            .job_failed_terminally(id, "locate failed after 3 attempts")
            .await
            .unwrap();
        assert_eq!(status, RunStatus::Error);

        // A sibling job finishing afterwards cannot resurrect the run.
        add_artifact(&store, id).await;
        add_artifact(&store, id).await;
        assert_eq!(
            aggregator.job_succeeded(id).await.unwrap(),
            RunStatus::Error
        );
    }

    #[tokio::test]
    async fn late_failure_does_not_overwrite_done() {
        let (store, aggregator, id) = setup();
        seed(&store, id, 1).await;

        add_artifact(&store, id).await;
        assert_eq!(aggregator.job_succeeded(id).await.unwrap(), RunStatus::Done);
        assert_eq!(
            aggregator.job_failed_terminally(id, "late").await.unwrap(),
            RunStatus::Done
        );
    }
}
