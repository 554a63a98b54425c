//! Bounded observe-plan-act loop that opens a message when the
//! deterministic locator has already failed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use inboxshot_core_types::{PipelineError, Provider};
use mail_locator::rules_for;
use session_broker::PageDriver;

use crate::model::{PageObservation, StepOutcome, UiStep};
use crate::planner::FallbackPlanner;

#[derive(Clone, Debug)]
pub struct FallbackConfig {
    /// Hard ceiling on planner steps per invocation.
    pub max_steps: u32,
    /// Probe used when checking whether the body is already visible.
    pub body_probe: Duration,
    /// Wait applied when the planner claims the message is open.
    pub done_verify: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            body_probe: Duration::from_millis(500),
            done_verify: Duration::from_secs(10),
        }
    }
}

pub struct FallbackAgent {
    planner: Arc<dyn FallbackPlanner>,
    cfg: FallbackConfig,
}

impl FallbackAgent {
    pub fn new(planner: Arc<dyn FallbackPlanner>, cfg: FallbackConfig) -> Self {
        Self { planner, cfg }
    }

    /// Drive the page until the provider's message body selector resolves.
    ///
    /// Every planner decision executes exactly one UI step; failures are fed
    /// back to the planner instead of ending the loop. The loop ends on a
    /// verified `Done`, an `Abort`, or the step ceiling.
    pub async fn open_message(
        &self,
        page: &Arc<dyn PageDriver>,
        provider: Provider,
        needle: &str,
    ) -> Result<(), PipelineError> {
        let body = rules_for(provider).message_body;
        let mut last_outcome: Option<StepOutcome> = None;

        for step_index in 0..self.cfg.max_steps {
            let observation = PageObservation {
                provider,
                needle: needle.to_string(),
                url: page.current_url().await.unwrap_or_default(),
                body_visible: page
                    .wait_for_selector(body, self.cfg.body_probe)
                    .await
                    .is_ok(),
                step_index,
                last_outcome: last_outcome.take(),
            };

            let step = self.planner.next_step(&observation).await?;
            debug!(target: "fallback-agent", %provider, step_index, ?step, "executing step");

            match step {
                UiStep::Done => {
                    page.wait_for_selector(body, self.cfg.done_verify)
                        .await
                        .map_err(|err| {
                            PipelineError::fallback(format!(
                                "planner reported done but message body is absent: {}",
                                err.message
                            ))
                        })?;
                    info!(target: "fallback-agent", %provider, steps = step_index, "message opened");
                    return Ok(());
                }
                UiStep::Abort { reason } => {
                    return Err(PipelineError::fallback(format!("planner aborted: {reason}")));
                }
                other => {
                    last_outcome = Some(match self.execute(page, &other).await {
                        Ok(()) => StepOutcome::ok(other),
                        Err(err) => {
                            warn!(target: "fallback-agent", %provider, step_index,
                                  error = %err.message, "step failed");
                            StepOutcome::failed(other, err.message)
                        }
                    });
                }
            }
        }

        Err(PipelineError::fallback(format!(
            "message not opened within {} steps",
            self.cfg.max_steps
        )))
    }

    async fn execute(
        &self,
        page: &Arc<dyn PageDriver>,
        step: &UiStep,
    ) -> Result<(), PipelineError> {
        match step {
            UiStep::Navigate { url } => page.goto(url).await,
            UiStep::Click { selector } => page.click(selector).await,
            UiStep::ClickCenter { selector } => page.click_center(selector).await,
            UiStep::Fill { selector, text } => page.fill(selector, text).await,
            UiStep::Press { key } => page.press_key(key).await,
            UiStep::WaitFor {
                selector,
                timeout_ms,
            } => {
                page.wait_for_selector(selector, Duration::from_millis(*timeout_ms))
                    .await
            }
            UiStep::Done | UiStep::Abort { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use inboxshot_core_types::{ErrorKind, VisualMode};
    use serde_json::Value;
    use session_broker::Rect;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Page whose body selector starts resolving after N probes.
    struct LatchPage {
        calls: Mutex<Vec<String>>,
        body_after: AtomicU32,
        body_probes: AtomicU32,
    }

    impl LatchPage {
        fn new(body_after: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                body_after: AtomicU32::new(body_after),
                body_probes: AtomicU32::new(0),
            })
        }

        fn record(&self, entry: impl Into<String>) {
            self.calls.lock().unwrap().push(entry.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageDriver for LatchPage {
        async fn goto(&self, url: &str) -> Result<(), PipelineError> {
            self.record(format!("goto:{url}"));
            Ok(())
        }

        async fn evaluate(&self, _expr: &str) -> Result<Value, PipelineError> {
            Ok(Value::Null)
        }

        async fn wait_for_selector(
            &self,
            selector: &str,
            _timeout: Duration,
        ) -> Result<(), PipelineError> {
            if selector == "div.a3s" {
                let seen = self.body_probes.fetch_add(1, Ordering::SeqCst);
                if seen >= self.body_after.load(Ordering::SeqCst) {
                    return Ok(());
                }
                return Err(PipelineError::locate("body not yet present"));
            }
            self.record(format!("wait:{selector}"));
            Ok(())
        }

        async fn element_rect(&self, _selector: &str) -> Result<Rect, PipelineError> {
            Ok(Rect {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
            })
        }

        async fn click(&self, selector: &str) -> Result<(), PipelineError> {
            self.record(format!("click:{selector}"));
            Ok(())
        }

        async fn click_center(&self, selector: &str) -> Result<(), PipelineError> {
            self.record(format!("click_center:{selector}"));
            Ok(())
        }

        async fn fill(&self, selector: &str, text: &str) -> Result<(), PipelineError> {
            self.record(format!("fill:{selector}:{text}"));
            Ok(())
        }

        async fn type_text(&self, text: &str) -> Result<(), PipelineError> {
            self.record(format!("type:{text}"));
            Ok(())
        }

        async fn press_key(&self, key: &str) -> Result<(), PipelineError> {
            self.record(format!("press:{key}"));
            Ok(())
        }

        async fn set_color_scheme(&self, _mode: VisualMode) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn wait_network_quiet(&self, _bound: Duration) -> bool {
            true
        }

        async fn screenshot_element(&self, _selector: &str) -> Result<Vec<u8>, PipelineError> {
            Ok(Vec::new())
        }

        async fn current_url(&self) -> Result<String, PipelineError> {
            Ok("https://mail.google.com/mail/u/0/".to_string())
        }
    }

    struct ScriptedPlanner {
        steps: Mutex<Vec<UiStep>>,
    }

    impl ScriptedPlanner {
        fn new(steps: Vec<UiStep>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps),
            })
        }
    }

    #[async_trait]
    impl FallbackPlanner for ScriptedPlanner {
        async fn next_step(&self, _observation: &PageObservation) -> Result<UiStep, PipelineError> {
            let mut steps = self.steps.lock().unwrap();
            if steps.is_empty() {
                return Ok(UiStep::Abort {
                    reason: "script exhausted".to_string(),
                });
            }
            Ok(steps.remove(0))
        }
    }

    fn agent(planner: Arc<dyn FallbackPlanner>) -> FallbackAgent {
        FallbackAgent::new(planner, FallbackConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_run_opens_message_and_verifies_body() {
        // Body appears after two probes: the initial observation, one mid-loop
        // probe, then the Done verification resolves.
        let page = LatchPage::new(2);
        let driver: Arc<dyn PageDriver> = page.clone();
        let planner = ScriptedPlanner::new(vec![
            UiStep::Click {
                selector: "tr.zA".to_string(),
            },
            UiStep::Done,
        ]);

        agent(planner)
            .open_message(&driver, Provider::Gmail, "diff-abc123")
            .await
            .unwrap();
        assert_eq!(page.calls(), vec!["click:tr.zA".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn done_without_visible_body_is_a_fallback_error() {
        let page = LatchPage::new(u32::MAX);
        let driver: Arc<dyn PageDriver> = page.clone();
        let planner = ScriptedPlanner::new(vec![UiStep::Done]);

        let err = agent(planner)
            .open_message(&driver, Provider::Gmail, "diff-abc123")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Fallback);
        assert!(err.message.contains("body is absent"));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_surfaces_the_planner_reason() {
        let page = LatchPage::new(u32::MAX);
        let driver: Arc<dyn PageDriver> = page.clone();
        let planner = ScriptedPlanner::new(vec![UiStep::Abort {
            reason: "captcha wall".to_string(),
        }]);

        let err = agent(planner)
            .open_message(&driver, Provider::Gmail, "diff-abc123")
            .await
            .unwrap_err();
        assert!(err.message.contains("captcha wall"));
    }

    #[tokio::test(start_paused = true)]
    async fn step_ceiling_bounds_the_loop() {
        let page = LatchPage::new(u32::MAX);
        let driver: Arc<dyn PageDriver> = page.clone();
        let steps = (0..64)
            .map(|_| UiStep::Press {
                key: "Escape".to_string(),
            })
            .collect();
        let planner = ScriptedPlanner::new(steps);

        let err = agent(planner)
            .open_message(&driver, Provider::Gmail, "diff-abc123")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Fallback);
        assert_eq!(page.calls().len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_steps_are_reported_back_to_the_planner() {
        struct OutcomeCheckingPlanner {
            seen_failure: AtomicU32,
        }

        #[async_trait]
        impl FallbackPlanner for OutcomeCheckingPlanner {
            async fn next_step(
                &self,
                observation: &PageObservation,
            ) -> Result<UiStep, PipelineError> {
                if let Some(outcome) = &observation.last_outcome {
                    if !outcome.ok {
                        self.seen_failure.fetch_add(1, Ordering::SeqCst);
                        return Ok(UiStep::Abort {
                            reason: "giving up after failed step".to_string(),
                        });
                    }
                }
                Ok(UiStep::WaitFor {
                    selector: "#never".to_string(),
                    timeout_ms: 100,
                })
            }
        }

        struct AlwaysFailWait;

        #[async_trait]
        impl PageDriver for AlwaysFailWait {
            async fn goto(&self, _url: &str) -> Result<(), PipelineError> {
                Ok(())
            }
            async fn evaluate(&self, _expr: &str) -> Result<Value, PipelineError> {
                Ok(Value::Null)
            }
            async fn wait_for_selector(
                &self,
                _selector: &str,
                _timeout: Duration,
            ) -> Result<(), PipelineError> {
                Err(PipelineError::locate("missing"))
            }
            async fn element_rect(&self, _selector: &str) -> Result<Rect, PipelineError> {
                Err(PipelineError::locate("missing"))
            }
            async fn click(&self, _selector: &str) -> Result<(), PipelineError> {
                Ok(())
            }
            async fn click_center(&self, _selector: &str) -> Result<(), PipelineError> {
                Ok(())
            }
            async fn fill(&self, _selector: &str, _text: &str) -> Result<(), PipelineError> {
                Ok(())
            }
            async fn type_text(&self, _text: &str) -> Result<(), PipelineError> {
                Ok(())
            }
            async fn press_key(&self, _key: &str) -> Result<(), PipelineError> {
                Ok(())
            }
            async fn set_color_scheme(&self, _mode: VisualMode) -> Result<(), PipelineError> {
                Ok(())
            }
            async fn wait_network_quiet(&self, _bound: Duration) -> bool {
                true
            }
            async fn screenshot_element(&self, _selector: &str) -> Result<Vec<u8>, PipelineError> {
                Ok(Vec::new())
            }
            async fn current_url(&self) -> Result<String, PipelineError> {
                Ok(String::new())
            }
        }

        let planner = Arc::new(OutcomeCheckingPlanner {
            seen_failure: AtomicU32::new(0),
        });
        let driver: Arc<dyn PageDriver> = Arc::new(AlwaysFailWait);

        let err = agent(planner.clone())
            .open_message(&driver, Provider::Outlook, "diff-abc123")
            .await
            .unwrap_err();
        assert!(err.message.contains("giving up"));
        assert_eq!(planner.seen_failure.load(Ordering::SeqCst), 1);
    }
}
