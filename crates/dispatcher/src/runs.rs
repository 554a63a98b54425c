//! Run creation: one run row plus one job per provider/engine pair.

use std::sync::Arc;

use tracing::info;

use inboxshot_core_types::{LocatingHint, PipelineError, ProviderPair, RunId, VisualMode};
use run_store::{Run, RunStore};

use crate::job::JobPayload;
use crate::metrics;
use crate::queue::JobQueue;

#[derive(Clone, Debug)]
pub struct RunRequest {
    /// Caller's reference to the message under verification.
    pub email_ref: String,
    /// Caller's reference to the rendered version being checked.
    pub version_ref: String,
    pub pairs: Vec<ProviderPair>,
    pub hint: LocatingHint,
}

/// Insert the run row, then enqueue one job per pair. The expected artifact
/// count is fixed here, before any job runs, so partial completions can
/// never look like a finished run.
pub async fn create_run(
    store: &Arc<dyn RunStore>,
    queue: &JobQueue,
    request: RunRequest,
) -> Result<RunId, PipelineError> {
    if request.pairs.is_empty() {
        return Err(PipelineError::internal("run requested with no pairs"));
    }

    let run_id = RunId::new();
    let expected = (request.pairs.len() * VisualMode::ALL.len()) as u32;
    store
        .insert_run(Run::new(
            run_id,
            request.email_ref.clone(),
            request.version_ref.clone(),
            expected,
        ))
        .await?;

    for pair in &request.pairs {
        queue.enqueue(JobPayload::new(run_id, *pair, request.hint.clone()));
        metrics::record_job_enqueued();
    }

    info!(target: "dispatcher", run = %run_id, jobs = request.pairs.len(),
          expected_artifacts = expected, "run created");
    Ok(run_id)
}
