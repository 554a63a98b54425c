//! Storage seam for run and artifact rows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use inboxshot_core_types::{PipelineError, RunId};

use crate::model::{ArtifactRow, Run, RunStatus};

/// Backend-agnostic view of the run database. Terminal statuses are sticky:
/// `try_finish` and `mark_error` are no-ops on a run that is already `Done`
/// or `Error`.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(&self, run: Run) -> Result<(), PipelineError>;

    /// Returns `None` when the row does not exist (or is not visible yet).
    async fn get_run(&self, id: RunId) -> Result<Option<Run>, PipelineError>;

    /// Move a `Pending` run to `Running`. Any other current status is left
    /// untouched.
    async fn mark_running(&self, id: RunId) -> Result<(), PipelineError>;

    /// Move a non-terminal run to `Done`. Returns the status after the call.
    async fn try_finish(&self, id: RunId) -> Result<RunStatus, PipelineError>;

    /// Move a non-terminal run to `Error` with a message. Returns the status
    /// after the call.
    async fn mark_error(&self, id: RunId, message: &str) -> Result<RunStatus, PipelineError>;

    async fn insert_artifact(&self, artifact: ArtifactRow) -> Result<(), PipelineError>;

    async fn artifact_count(&self, run_id: RunId) -> Result<u32, PipelineError>;

    async fn artifacts_for_run(&self, run_id: RunId) -> Result<Vec<ArtifactRow>, PipelineError>;
}

#[async_trait]
impl<S: RunStore + ?Sized> RunStore for Arc<S> {
    async fn insert_run(&self, run: Run) -> Result<(), PipelineError> {
        (**self).insert_run(run).await
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>, PipelineError> {
        (**self).get_run(id).await
    }

    async fn mark_running(&self, id: RunId) -> Result<(), PipelineError> {
        (**self).mark_running(id).await
    }

    async fn try_finish(&self, id: RunId) -> Result<RunStatus, PipelineError> {
        (**self).try_finish(id).await
    }

    async fn mark_error(&self, id: RunId, message: &str) -> Result<RunStatus, PipelineError> {
        (**self).mark_error(id, message).await
    }

    async fn insert_artifact(&self, artifact: ArtifactRow) -> Result<(), PipelineError> {
        (**self).insert_artifact(artifact).await
    }

    async fn artifact_count(&self, run_id: RunId) -> Result<u32, PipelineError> {
        (**self).artifact_count(run_id).await
    }

    async fn artifacts_for_run(&self, run_id: RunId) -> Result<Vec<ArtifactRow>, PipelineError> {
        (**self).artifacts_for_run(run_id).await
    }
}

struct StoredRun {
    run: Run,
    inserted_at: Instant,
}

/// In-memory store used by tests and single-process deployments.
///
/// `visible_after` delays `get_run` visibility of freshly inserted rows,
/// mimicking a read replica that lags behind the writer.
pub struct MemoryRunStore {
    runs: DashMap<RunId, StoredRun>,
    artifacts: DashMap<RunId, Vec<ArtifactRow>>,
    visible_after: Duration,
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: DashMap::new(),
            artifacts: DashMap::new(),
            visible_after: Duration::ZERO,
        }
    }

    pub fn with_visibility_lag(visible_after: Duration) -> Self {
        Self {
            runs: DashMap::new(),
            artifacts: DashMap::new(),
            visible_after,
        }
    }

    fn update<F>(&self, id: RunId, f: F) -> Result<RunStatus, PipelineError>
    where
        F: FnOnce(&mut Run),
    {
        let mut entry = self
            .runs
            .get_mut(&id)
            .ok_or_else(|| PipelineError::run_missing(format!("run {id} not found")))?;
        f(&mut entry.run);
        entry.run.updated_at = Utc::now();
        Ok(entry.run.status)
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn insert_run(&self, run: Run) -> Result<(), PipelineError> {
        self.runs.insert(
            run.id,
            StoredRun {
                run,
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>, PipelineError> {
        match self.runs.get(&id) {
            Some(entry) if entry.inserted_at.elapsed() >= self.visible_after => {
                Ok(Some(entry.run.clone()))
            }
            Some(_) => {
                debug!(target: "run-store", run = %id, "row not visible yet");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn mark_running(&self, id: RunId) -> Result<(), PipelineError> {
        self.update(id, |run| {
            if run.status == RunStatus::Pending {
                run.status = RunStatus::Running;
            }
        })?;
        Ok(())
    }

    async fn try_finish(&self, id: RunId) -> Result<RunStatus, PipelineError> {
        self.update(id, |run| {
            if !run.status.is_terminal() {
                run.status = RunStatus::Done;
            }
        })
    }

    async fn mark_error(&self, id: RunId, message: &str) -> Result<RunStatus, PipelineError> {
        self.update(id, |run| {
            if !run.status.is_terminal() {
                run.status = RunStatus::Error;
                run.error = Some(message.to_string());
            }
        })
    }

    async fn insert_artifact(&self, artifact: ArtifactRow) -> Result<(), PipelineError> {
        self.artifacts
            .entry(artifact.run_id)
            .or_default()
            .push(artifact);
        Ok(())
    }

    async fn artifact_count(&self, run_id: RunId) -> Result<u32, PipelineError> {
        Ok(self
            .artifacts
            .get(&run_id)
            .map(|rows| rows.len() as u32)
            .unwrap_or(0))
    }

    async fn artifacts_for_run(&self, run_id: RunId) -> Result<Vec<ArtifactRow>, PipelineError> {
        Ok(self
            .artifacts
            .get(&run_id)
            .map(|rows| rows.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inboxshot_core_types::{ArtifactId, Engine, ErrorKind, JobId, Provider, ProviderPair, VisualMode};

    fn artifact(run_id: RunId, key: &str) -> ArtifactRow {
        ArtifactRow {
            id: ArtifactId::new(),
            run_id,
            job_id: JobId::new(),
            pair: ProviderPair::new(Provider::Gmail, Engine::Chromium),
            mode: VisualMode::Light,
            fallback: false,
            key: key.to_string(),
            url: format!("memory://{key}"),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn terminal_statuses_are_sticky() {
        let store = MemoryRunStore::new();
        let id = RunId::new();
        store.insert_run(Run::new(id, "email-1", "v1", 2)).await.unwrap();

        assert_eq!(store.try_finish(id).await.unwrap(), RunStatus::Done);
        // A late terminal failure must not overwrite Done.
        assert_eq!(store.mark_error(id, "late").await.unwrap(), RunStatus::Done);
        let run = store.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Done);
        assert_eq!(run.error, None);
    }

    #[tokio::test]
    async fn error_does_not_yield_to_later_finish() {
        let store = MemoryRunStore::new();
        let id = RunId::new();
        store.insert_run(Run::new(id, "email-1", "v1", 2)).await.unwrap();

        store.mark_error(id, "boom").await.unwrap();
        assert_eq!(store.try_finish(id).await.unwrap(), RunStatus::Error);
    }

    #[tokio::test]
    async fn mark_running_only_promotes_pending() {
        let store = MemoryRunStore::new();
        let id = RunId::new();
        store.insert_run(Run::new(id, "email-1", "v1", 2)).await.unwrap();

        store.mark_running(id).await.unwrap();
        store.try_finish(id).await.unwrap();
        store.mark_running(id).await.unwrap();
        let run = store.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Done);
    }

    #[tokio::test]
    async fn updates_on_missing_runs_report_run_missing() {
        let store = MemoryRunStore::new();
        let err = store.try_finish(RunId::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RunMissing);
        assert!(err.is_permanent());
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_lag_hides_fresh_rows_until_it_elapses() {
        let store = MemoryRunStore::with_visibility_lag(Duration::from_millis(250));
        let id = RunId::new();
        store.insert_run(Run::new(id, "email-1", "v1", 2)).await.unwrap();

        assert!(store.get_run(id).await.unwrap().is_none());
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(store.get_run(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn artifacts_accumulate_per_run() {
        let store = MemoryRunStore::new();
        let id = RunId::new();
        store.insert_run(Run::new(id, "email-1", "v1", 4)).await.unwrap();

        store
            .insert_artifact(artifact(id, "screenshots/a-light.png"))
            .await
            .unwrap();
        store
            .insert_artifact(artifact(id, "screenshots/a-dark.png"))
            .await
            .unwrap();

        assert_eq!(store.artifact_count(id).await.unwrap(), 2);
        assert_eq!(store.artifact_count(RunId::new()).await.unwrap(), 0);
        let rows = store.artifacts_for_run(id).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
