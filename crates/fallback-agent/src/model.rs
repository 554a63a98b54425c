//! Types exchanged between the fallback loop and its planner.

use serde::{Deserialize, Serialize};

use inboxshot_core_types::Provider;

/// What the loop tells the planner about the page before each step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageObservation {
    pub provider: Provider,
    /// Token identifying the wanted message (subject marker or message id).
    pub needle: String,
    pub url: String,
    /// Whether the provider's message body selector currently resolves.
    pub body_visible: bool,
    /// Zero-based index of the step about to run.
    pub step_index: u32,
    /// Outcome of the previous step, if any.
    pub last_outcome: Option<StepOutcome>,
}

/// One UI action the planner may ask for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UiStep {
    Navigate { url: String },
    Click { selector: String },
    /// Physical pointer click at the element center, for widgets that
    /// ignore programmatic clicks.
    ClickCenter { selector: String },
    Fill { selector: String, text: String },
    Press { key: String },
    WaitFor { selector: String, timeout_ms: u64 },
    /// The planner believes the message is open.
    Done,
    /// The planner has given up.
    Abort { reason: String },
}

/// Result of executing one step, fed back on the next observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: UiStep,
    pub ok: bool,
    pub detail: Option<String>,
}

impl StepOutcome {
    pub fn ok(step: UiStep) -> Self {
        Self {
            step,
            ok: true,
            detail: None,
        }
    }

    pub fn failed(step: UiStep, detail: impl Into<String>) -> Self {
        Self {
            step,
            ok: false,
            detail: Some(detail.into()),
        }
    }
}
