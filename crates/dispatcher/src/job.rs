//! Job payloads and queueing knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use inboxshot_core_types::{JobId, LocatingHint, ProviderPair, RunId};

/// One capture job: open one message in one provider/engine combination and
/// screenshot it in both color schemes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: JobId,
    pub run_id: RunId,
    pub pair: ProviderPair,
    pub hint: LocatingHint,
}

impl JobPayload {
    pub fn new(run_id: RunId, pair: ProviderPair, hint: LocatingHint) -> Self {
        Self {
            job_id: JobId::new(),
            run_id,
            pair,
            hint,
        }
    }

    /// Text fed into the provider's search UI.
    pub fn needle(&self) -> &str {
        match &self.hint {
            LocatingHint::SubjectToken(token) => token,
            LocatingHint::MessageId(id) => id,
        }
    }
}

/// Queueing policy applied to every job of a run.
#[derive(Clone, Debug)]
pub struct EnqueueOptions {
    /// Total tries per job, first execution included.
    pub max_attempts: u32,
    /// Base of the exponential retry delay: base, 2x base, 4x base, ...
    pub backoff_base: Duration,
    /// Keep the queue entry around after a successful ack.
    pub retain_on_success: bool,
    /// Keep the queue entry around after a terminal failure.
    pub retain_on_failure: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(30),
            retain_on_success: false,
            retain_on_failure: true,
        }
    }
}

impl EnqueueOptions {
    /// Delay before the next try after `failed_attempt` (1-based) failed.
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.backoff_base * 2u32.pow(exponent)
    }
}
