//! Planner seam for the fallback loop.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use inboxshot_core_types::PipelineError;
use mail_locator::rules_for;

use crate::model::{PageObservation, UiStep};

/// Abstraction over step planners so multiple vendors can drive the loop.
#[async_trait]
pub trait FallbackPlanner: Send + Sync {
    /// Decide the next UI step from the current observation.
    async fn next_step(&self, observation: &PageObservation) -> Result<UiStep, PipelineError>;
}

/// Deterministic planner used for tests and offline development. Replays a
/// search-and-open script built from the provider's own selectors.
#[derive(Debug, Default, Clone)]
pub struct MockPlanner;

#[async_trait]
impl FallbackPlanner for MockPlanner {
    async fn next_step(&self, observation: &PageObservation) -> Result<UiStep, PipelineError> {
        if observation.body_visible {
            return Ok(UiStep::Done);
        }
        let rules = rules_for(observation.provider);
        let step = match observation.step_index {
            0 => UiStep::Navigate {
                url: rules.inbox_url.to_string(),
            },
            1 => UiStep::Fill {
                selector: rules.search_field.to_string(),
                text: observation.needle.clone(),
            },
            2 => UiStep::Press {
                key: "Enter".to_string(),
            },
            3 => UiStep::Click {
                selector: rules.search_result.to_string(),
            },
            4 => UiStep::WaitFor {
                selector: rules.message_body.to_string(),
                timeout_ms: 10_000,
            },
            _ => UiStep::Abort {
                reason: "script exhausted without opening the message".to_string(),
            },
        };
        Ok(step)
    }
}

#[derive(Clone, Debug)]
pub struct HttpPlannerConfig {
    pub endpoint: String,
    pub api_key: String,
    pub request_timeout: std::time::Duration,
}

impl HttpPlannerConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            request_timeout: std::time::Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    observation: &'a PageObservation,
}

/// Planner backed by a remote model endpoint. The endpoint receives the
/// observation and answers with a single `UiStep` in JSON.
pub struct HttpPlanner {
    cfg: HttpPlannerConfig,
    client: reqwest::Client,
}

impl HttpPlanner {
    pub fn new(cfg: HttpPlannerConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|err| PipelineError::fallback(format!("planner client: {err}")))?;
        Ok(Self { cfg, client })
    }
}

#[async_trait]
impl FallbackPlanner for HttpPlanner {
    async fn next_step(&self, observation: &PageObservation) -> Result<UiStep, PipelineError> {
        debug!(target: "fallback-agent", step = observation.step_index, "requesting plan");
        let response = self
            .client
            .post(&self.cfg.endpoint)
            .bearer_auth(&self.cfg.api_key)
            .json(&PlanRequest { observation })
            .send()
            .await
            .map_err(|err| PipelineError::fallback(format!("planner request: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::fallback(format!(
                "planner endpoint answered {status}"
            )));
        }
        response
            .json::<UiStep>()
            .await
            .map_err(|err| PipelineError::fallback(format!("planner payload: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inboxshot_core_types::Provider;

    fn observation(step_index: u32, body_visible: bool) -> PageObservation {
        PageObservation {
            provider: Provider::Gmail,
            needle: "diff-abc123".to_string(),
            url: "https://mail.google.com/mail/u/0/".to_string(),
            body_visible,
            step_index,
            last_outcome: None,
        }
    }

    #[tokio::test]
    async fn mock_planner_walks_search_then_open() {
        let planner = MockPlanner;
        let first = planner.next_step(&observation(0, false)).await.unwrap();
        assert!(matches!(first, UiStep::Navigate { .. }));
        let fill = planner.next_step(&observation(1, false)).await.unwrap();
        assert!(matches!(fill, UiStep::Fill { ref text, .. } if text == "diff-abc123"));
        let open = planner.next_step(&observation(3, false)).await.unwrap();
        assert_eq!(
            open,
            UiStep::Click {
                selector: "tr.zA".to_string()
            }
        );
    }

    #[tokio::test]
    async fn mock_planner_signals_done_once_body_is_visible() {
        let planner = MockPlanner;
        let step = planner.next_step(&observation(2, true)).await.unwrap();
        assert_eq!(step, UiStep::Done);
    }

    #[tokio::test]
    async fn mock_planner_aborts_after_script_end() {
        let planner = MockPlanner;
        let step = planner.next_step(&observation(9, false)).await.unwrap();
        assert!(matches!(step, UiStep::Abort { .. }));
    }

    #[test]
    fn ui_step_serializes_with_op_tag() {
        let step = UiStep::Fill {
            selector: "#q".to_string(),
            text: "hello".to_string(),
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["op"], "fill");
        assert_eq!(value["selector"], "#q");
    }
}
