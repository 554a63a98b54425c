//! Adaptive fallback for messages the deterministic locator cannot open.

pub mod agent;
pub mod model;
pub mod planner;

pub use agent::{FallbackAgent, FallbackConfig};
pub use model::{PageObservation, StepOutcome, UiStep};
pub use planner::{FallbackPlanner, HttpPlanner, HttpPlannerConfig, MockPlanner};
