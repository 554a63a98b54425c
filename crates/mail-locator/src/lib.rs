//! Mailbox search and message opening driven by per-provider UI rules.

pub mod locator;
pub mod rules;

pub use locator::{EmailLocator, LocatorConfig};
pub use rules::{rules_for, OpenStyle, ProviderRules};
