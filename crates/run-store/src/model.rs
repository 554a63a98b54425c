//! Run and artifact rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use inboxshot_core_types::{ArtifactId, JobId, ProviderPair, RunId, VisualMode};

/// Lifecycle of a run. `Done` and `Error` are terminal and never change
/// once written.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Error)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    /// Caller's reference to the message under verification.
    pub email_ref: String,
    /// Caller's reference to the rendered version being checked.
    pub version_ref: String,
    pub status: RunStatus,
    /// Artifact count at which the run is considered complete. Fixed at
    /// creation time: two captures per requested provider/engine pair.
    pub expected_artifacts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(
        id: RunId,
        email_ref: impl Into<String>,
        version_ref: impl Into<String>,
        expected_artifacts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            email_ref: email_ref.into(),
            version_ref: version_ref.into(),
            status: RunStatus::Pending,
            expected_artifacts,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub id: ArtifactId,
    pub run_id: RunId,
    pub job_id: JobId,
    pub pair: ProviderPair,
    pub mode: VisualMode,
    /// True when the screenshot came from the adaptive tier.
    pub fallback: bool,
    /// Object key under which the screenshot was stored.
    pub key: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}
