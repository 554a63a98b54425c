//! Page driving surface consumed by the locator, capture and fallback crates.
//!
//! `PageDriver` is the seam: the real implementation speaks raw CDP through a
//! [`CdpTransport`]; tests substitute scripted drivers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::debug;

use inboxshot_core_types::{PipelineError, VisualMode};

use crate::transport::{CdpTransport, CommandTarget};

/// Viewport-relative bounding box of an element.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), PipelineError>;

    async fn evaluate(&self, expression: &str) -> Result<Value, PipelineError>;

    /// Poll until the selector resolves to an element; `Locate` error on
    /// timeout.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), PipelineError>;

    async fn element_rect(&self, selector: &str) -> Result<Rect, PipelineError>;

    /// Programmatic click on the first element matching the selector.
    async fn click(&self, selector: &str) -> Result<(), PipelineError>;

    /// Literal pointer click at the element's visual center; required where
    /// the provider UI intercepts synthetic click events.
    async fn click_center(&self, selector: &str) -> Result<(), PipelineError>;

    /// Focus the element and replace its value in one step.
    async fn fill(&self, selector: &str, text: &str) -> Result<(), PipelineError>;

    /// Type into whatever currently holds focus, one key event per char.
    async fn type_text(&self, text: &str) -> Result<(), PipelineError>;

    async fn press_key(&self, key: &str) -> Result<(), PipelineError>;

    async fn set_color_scheme(&self, mode: VisualMode) -> Result<(), PipelineError>;

    /// Best-effort wait for network activity to settle within `bound`.
    /// Returns whether quiet was observed; never an error.
    async fn wait_network_quiet(&self, bound: Duration) -> bool;

    /// PNG snapshot clipped to the element's bounding box.
    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>, PipelineError>;

    async fn current_url(&self) -> Result<String, PipelineError>;
}

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);
const NETWORK_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Real page driver bound to one attached CDP session.
pub struct CdpPage {
    transport: Arc<dyn CdpTransport>,
    session_id: String,
    target_id: String,
}

impl CdpPage {
    pub fn new(transport: Arc<dyn CdpTransport>, session_id: String, target_id: String) -> Self {
        Self {
            transport,
            session_id,
            target_id,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    fn target(&self) -> CommandTarget {
        CommandTarget::Session(self.session_id.clone())
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, PipelineError> {
        self.transport.send_command(self.target(), method, params).await
    }

    async fn selector_resolves(&self, selector: &str) -> Result<bool, PipelineError> {
        let expr = format!(
            "!!document.querySelector({})",
            serde_json::to_string(selector).unwrap_or_default()
        );
        Ok(self.evaluate(&expr).await?.as_bool().unwrap_or(false))
    }

    async fn dispatch_mouse(&self, kind: &str, x: f64, y: f64) -> Result<(), PipelineError> {
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": kind,
                "x": x,
                "y": y,
                "button": "left",
                "clickCount": 1,
                "pointerType": "mouse",
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn goto(&self, url: &str) -> Result<(), PipelineError> {
        let result = self.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                return Err(PipelineError::session(format!(
                    "navigation to {url} failed: {error_text}"
                )));
            }
        }

        // domcontentloaded-equivalent gate; providers keep loading long after.
        let deadline = Duration::from_secs(30);
        let settled = tokio::time::timeout(deadline, async {
            loop {
                match self.evaluate("document.readyState").await {
                    Ok(state) => {
                        let state = state.as_str().unwrap_or("");
                        if state == "interactive" || state == "complete" {
                            return Ok(());
                        }
                    }
                    Err(err) => return Err(err),
                }
                sleep(SELECTOR_POLL_INTERVAL).await;
            }
        })
        .await;

        match settled {
            Ok(inner) => inner,
            Err(_) => Err(PipelineError::session(format!(
                "navigation to {url} did not reach domcontentloaded within {deadline:?}"
            ))),
        }
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, PipelineError> {
        let response = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if response.get("exceptionDetails").is_some() {
            return Err(PipelineError::internal(format!(
                "script raised exception: {expression}"
            )));
        }

        Ok(response
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), PipelineError> {
        let found = tokio::time::timeout(timeout, async {
            loop {
                if self.selector_resolves(selector).await? {
                    return Ok::<_, PipelineError>(());
                }
                sleep(SELECTOR_POLL_INTERVAL).await;
            }
        })
        .await;

        match found {
            Ok(inner) => inner,
            Err(_) => Err(PipelineError::locate(format!(
                "selector {selector:?} not found within {timeout:?}"
            ))),
        }
    }

    async fn element_rect(&self, selector: &str) -> Result<Rect, PipelineError> {
        let quoted = serde_json::to_string(selector).unwrap_or_default();
        let expr = format!(
            "(() => {{ const el = document.querySelector({quoted}); \
             if (!el) return null; const r = el.getBoundingClientRect(); \
             return {{ x: r.x, y: r.y, width: r.width, height: r.height }}; }})()"
        );
        let value = self.evaluate(&expr).await?;
        if value.is_null() {
            return Err(PipelineError::locate(format!(
                "no element for selector {selector:?}"
            )));
        }
        serde_json::from_value(value).map_err(|err| {
            PipelineError::internal(format!("bad bounding box for {selector:?}: {err}"))
        })
    }

    async fn click(&self, selector: &str) -> Result<(), PipelineError> {
        let quoted = serde_json::to_string(selector).unwrap_or_default();
        let expr = format!(
            "(() => {{ const el = document.querySelector({quoted}); \
             if (!el) return false; el.click(); return true; }})()"
        );
        if self.evaluate(&expr).await?.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(PipelineError::locate(format!(
                "no element to click for selector {selector:?}"
            )))
        }
    }

    async fn click_center(&self, selector: &str) -> Result<(), PipelineError> {
        let rect = self.element_rect(selector).await?;
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(PipelineError::locate(format!(
                "element {selector:?} has an empty bounding box"
            )));
        }
        let (x, y) = rect.center();
        self.dispatch_mouse("mousePressed", x, y).await?;
        self.dispatch_mouse("mouseReleased", x, y).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), PipelineError> {
        let quoted_sel = serde_json::to_string(selector).unwrap_or_default();
        let quoted_text = serde_json::to_string(text).unwrap_or_default();
        let expr = format!(
            "(() => {{ const el = document.querySelector({quoted_sel}); \
             if (!el) return false; el.focus(); el.value = {quoted_text}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true; }})()"
        );
        if self.evaluate(&expr).await?.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(PipelineError::locate(format!(
                "no element to fill for selector {selector:?}"
            )))
        }
    }

    async fn type_text(&self, text: &str) -> Result<(), PipelineError> {
        for ch in text.chars() {
            self.send(
                "Input.dispatchKeyEvent",
                json!({ "type": "char", "text": ch.to_string() }),
            )
            .await?;
            // Web-component token fields drop keystrokes typed back-to-back.
            sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), PipelineError> {
        let text = if key == "Enter" { "\r" } else { "" };
        self.send(
            "Input.dispatchKeyEvent",
            json!({ "type": "keyDown", "key": key, "text": text }),
        )
        .await?;
        self.send("Input.dispatchKeyEvent", json!({ "type": "keyUp", "key": key }))
            .await?;
        Ok(())
    }

    async fn set_color_scheme(&self, mode: VisualMode) -> Result<(), PipelineError> {
        self.send(
            "Emulation.setEmulatedMedia",
            json!({
                "features": [
                    { "name": "prefers-color-scheme", "value": mode.as_str() }
                ]
            }),
        )
        .await
        .map_err(|err| PipelineError::capture(format!("mode switch failed: {}", err.message)))?;
        Ok(())
    }

    async fn wait_network_quiet(&self, bound: Duration) -> bool {
        let quiet = tokio::time::timeout(bound, async {
            let mut last = -1i64;
            loop {
                let count = self
                    .evaluate("performance.getEntriesByType('resource').length")
                    .await
                    .ok()
                    .and_then(|v| v.as_i64())
                    .unwrap_or(-1);
                if count >= 0 && count == last {
                    return;
                }
                last = count;
                sleep(NETWORK_SAMPLE_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if !quiet {
            debug!(target: "session-broker", ?bound, "network did not go quiet; proceeding");
        }
        quiet
    }

    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>, PipelineError> {
        let rect = self.element_rect(selector).await?;
        let response = self
            .send(
                "Page.captureScreenshot",
                json!({
                    "format": "png",
                    "clip": {
                        "x": rect.x,
                        "y": rect.y,
                        "width": rect.width,
                        "height": rect.height,
                        "scale": 1,
                    },
                    "captureBeyondViewport": true,
                }),
            )
            .await
            .map_err(|err| PipelineError::capture(format!("screenshot failed: {}", err.message)))?;

        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::capture("screenshot response missing data"))?;

        Base64
            .decode(data)
            .map_err(|err| PipelineError::capture(format!("screenshot decode failed: {err}")))
    }

    async fn current_url(&self) -> Result<String, PipelineError> {
        let value = self.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}
