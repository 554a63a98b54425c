//! Search-and-open loop for the target message.
//!
//! The inner cycle (focus search, type token, submit, wait for a result,
//! open it) repeats until the message body renders or the outer wall-clock
//! deadline wins the race. The deadline may interrupt an attempt midway;
//! the enclosing job handler still owns session release.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use inboxshot_core_types::{LocatingHint, PipelineError, Provider};
use session_broker::PageDriver;

use crate::rules::{rules_for, OpenStyle, ProviderRules};

#[derive(Clone, Debug)]
pub struct LocatorConfig {
    /// Hard deadline for the whole locate operation.
    pub outer_timeout: Duration,
    /// Wait for the search field to render on each cycle.
    pub search_field_wait: Duration,
    /// Per-attempt window for a search result to render.
    pub result_wait: Duration,
    /// Wait for the message body after opening a result.
    pub body_wait: Duration,
    /// Pause between search cycles when nothing matched.
    pub retry_pause: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            outer_timeout: Duration::from_secs(90),
            search_field_wait: Duration::from_secs(10),
            result_wait: Duration::from_secs(5),
            body_wait: Duration::from_secs(10),
            retry_pause: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EmailLocator {
    cfg: LocatorConfig,
}

impl EmailLocator {
    pub fn new(cfg: LocatorConfig) -> Self {
        Self { cfg }
    }

    /// Navigate to the provider's inbox and open the message matching the
    /// hint. Fails with a `Locate` error when the deadline elapses first.
    pub async fn locate(
        &self,
        page: &Arc<dyn PageDriver>,
        provider: Provider,
        hint: &LocatingHint,
    ) -> Result<(), PipelineError> {
        let rules = rules_for(provider);
        let query = match hint {
            LocatingHint::SubjectToken(token) => token.as_str(),
            // Message ids are searchable text in every supported client.
            LocatingHint::MessageId(id) => id.as_str(),
        };

        debug!(target: "mail-locator", %provider, %query,
               timeout_ms = self.cfg.outer_timeout.as_millis() as u64, "begin locate");

        let outcome = tokio::time::timeout(self.cfg.outer_timeout, async {
            page.goto(rules.inbox_url).await?;
            self.search_loop(page, rules, query).await
        })
        .await;

        match outcome {
            Ok(inner) => inner,
            Err(_) => Err(PipelineError::locate(format!(
                "message matching {query:?} not found in {provider} within {:?}",
                self.cfg.outer_timeout
            ))),
        }
    }

    async fn search_loop(
        &self,
        page: &Arc<dyn PageDriver>,
        rules: &ProviderRules,
        query: &str,
    ) -> Result<(), PipelineError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            debug!(target: "mail-locator", provider = %rules.provider, attempts, "search attempt");

            page.wait_for_selector(rules.search_field, self.cfg.search_field_wait)
                .await?;
            match rules.open_style {
                OpenStyle::PointerCenterClick => {
                    page.click_center(rules.search_field).await?;
                    page.type_text(query).await?;
                }
                OpenStyle::StandardClick => {
                    // Focus explicitly first; filling alone does not always
                    // fire the provider's search listeners.
                    page.click(rules.search_field).await?;
                    page.fill(rules.search_field, query).await?;
                }
            }
            page.press_key("Enter").await?;

            match self.open_first_result(page, rules).await {
                Ok(()) => {
                    debug!(target: "mail-locator", provider = %rules.provider, attempts,
                           "message opened");
                    return Ok(());
                }
                Err(err) => {
                    debug!(target: "mail-locator", provider = %rules.provider, attempts, %err,
                           "no match yet; retrying");
                    sleep(self.cfg.retry_pause).await;
                }
            }
        }
    }

    async fn open_first_result(
        &self,
        page: &Arc<dyn PageDriver>,
        rules: &ProviderRules,
    ) -> Result<(), PipelineError> {
        page.wait_for_selector(rules.search_result, self.cfg.result_wait)
            .await?;

        match rules.open_style {
            OpenStyle::PointerCenterClick => page.click_center(rules.search_result).await?,
            OpenStyle::StandardClick => page.click(rules.search_result).await?,
        }

        page.wait_for_selector(rules.message_body, self.cfg.body_wait)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use inboxshot_core_types::VisualMode;
    use serde_json::Value;
    use session_broker::Rect;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Page whose search result appears only after a configured number of
    /// attempts; records every call.
    struct ScriptedPage {
        calls: Mutex<Vec<String>>,
        miss_selector: String,
        result_misses: AtomicUsize,
    }

    impl ScriptedPage {
        fn new(miss_selector: &str, result_misses: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                miss_selector: miss_selector.to_string(),
                result_misses: AtomicUsize::new(result_misses),
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
    impl PageDriver for ScriptedPage {
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
            timeout: Duration,
        ) -> Result<(), PipelineError> {
            self.record(format!("wait:{selector}"));
            if selector == self.miss_selector && self.result_misses.load(Ordering::SeqCst) > 0 {
                self.result_misses.fetch_sub(1, Ordering::SeqCst);
                sleep(timeout).await;
                return Err(PipelineError::locate(format!(
                    "selector {selector:?} not found"
                )));
            }
            Ok(())
        }

        async fn element_rect(&self, _selector: &str) -> Result<Rect, PipelineError> {
            Ok(Rect {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
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
            Ok("about:blank".into())
        }
    }

    fn token_hint() -> LocatingHint {
        LocatingHint::SubjectToken("tok-42".into())
    }

    #[tokio::test]
    async fn gmail_opens_on_first_attempt_with_standard_clicks() {
        let page = ScriptedPage::new("", 0);
        let driver: Arc<dyn PageDriver> = page.clone();
        let locator = EmailLocator::default();

        locator
            .locate(&driver, Provider::Gmail, &token_hint())
            .await
            .unwrap();

        let calls = page.calls();
        assert_eq!(calls[0], "goto:https://mail.google.com/mail/u/0/#inbox");
        assert!(calls.iter().any(|c| c.starts_with("fill:") && c.ends_with(":tok-42")));
        assert!(calls.iter().any(|c| c == "press:Enter"));
        assert!(calls.iter().any(|c| c == "click:tr.zA"));
        assert!(!calls.iter().any(|c| c.starts_with("click_center:")));
    }

    #[tokio::test]
    async fn icloud_uses_pointer_clicks_and_literal_typing() {
        let page = ScriptedPage::new("", 0);
        let driver: Arc<dyn PageDriver> = page.clone();
        let locator = EmailLocator::default();

        locator
            .locate(&driver, Provider::Icloud, &token_hint())
            .await
            .unwrap();

        let calls = page.calls();
        assert!(calls
            .iter()
            .any(|c| c == "click_center:ui-autocomplete-token-field input"));
        assert!(calls.iter().any(|c| c == "type:tok-42"));
        assert!(calls.iter().any(|c| c == "click_center:div.thread-list-item"));
        assert!(!calls.iter().any(|c| c.starts_with("fill:")));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_search_cycle_until_result_renders() {
        let page = ScriptedPage::new("tr.zA", 2);
        let driver: Arc<dyn PageDriver> = page.clone();
        let locator = EmailLocator::default();

        locator
            .locate(&driver, Provider::Gmail, &token_hint())
            .await
            .unwrap();

        let submits = page
            .calls()
            .iter()
            .filter(|c| *c == "press:Enter")
            .count();
        assert_eq!(submits, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn outer_deadline_beats_the_retry_loop() {
        // Result never renders; every cycle burns result_wait + retry_pause.
        let page = ScriptedPage::new("div[role='listbox'] div[role='option']", usize::MAX);
        let driver: Arc<dyn PageDriver> = page.clone();
        let locator = EmailLocator::new(LocatorConfig {
            outer_timeout: Duration::from_secs(90),
            ..LocatorConfig::default()
        });

        let err = locator
            .locate(&driver, Provider::Outlook, &token_hint())
            .await
            .unwrap_err();

        assert_eq!(err.kind, inboxshot_core_types::ErrorKind::Locate);
        assert!(err.message.contains("within"));
        assert!(err.retriable);
    }

    #[tokio::test]
    async fn message_id_hint_is_searched_as_text() {
        let page = ScriptedPage::new("", 0);
        let driver: Arc<dyn PageDriver> = page.clone();
        let locator = EmailLocator::default();

        locator
            .locate(
                &driver,
                Provider::Gmail,
                &LocatingHint::MessageId("CAF-xyz".into()),
            )
            .await
            .unwrap();

        assert!(page
            .calls()
            .iter()
            .any(|c| c.starts_with("fill:") && c.ends_with(":CAF-xyz")));
    }
}
