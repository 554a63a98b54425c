//! Capture of the rendered message body under one color scheme.
//!
//! Sequence per invocation: switch the emulated color scheme, wait for the
//! message body to be present, give remote content a bounded chance to
//! finish loading, settle, then snapshot the body element only.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use inboxshot_core_types::{PipelineError, Provider, VisualMode};
use mail_locator::rules_for;
use session_broker::PageDriver;

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Wait for the message body selector before capturing.
    pub body_wait: Duration,
    /// Best-effort bound on the network-quiet wait; exceeding it is fine.
    pub network_quiet_bound: Duration,
    /// Fixed settle buffer for images and fonts still painting.
    pub settle: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            body_wait: Duration::from_secs(10),
            network_quiet_bound: Duration::from_secs(5),
            settle: Duration::from_secs(3),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CaptureEngine {
    cfg: CaptureConfig,
}

impl CaptureEngine {
    pub fn new(cfg: CaptureConfig) -> Self {
        Self { cfg }
    }

    /// Capture the opened message's body under `mode`. The message must
    /// already be open; a missing body element is a capture-stage failure.
    pub async fn capture(
        &self,
        page: &Arc<dyn PageDriver>,
        provider: Provider,
        mode: VisualMode,
    ) -> Result<Vec<u8>, PipelineError> {
        let rules = rules_for(provider);
        debug!(target: "capture-engine", %provider, %mode, "preparing capture");

        page.set_color_scheme(mode).await?;
        page.wait_for_selector(rules.message_body, self.cfg.body_wait)
            .await
            .map_err(|err| PipelineError::capture(err.message))?;

        let quiet = page.wait_network_quiet(self.cfg.network_quiet_bound).await;
        if !quiet {
            debug!(target: "capture-engine", %provider, %mode,
                   "network never went quiet; capturing anyway");
        }
        sleep(self.cfg.settle).await;

        let bytes = page.screenshot_element(rules.message_body).await?;
        info!(target: "capture-engine", %provider, %mode, size = bytes.len(), "captured");
        Ok(bytes)
    }
}
