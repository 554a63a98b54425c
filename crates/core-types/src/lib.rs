//! Shared primitives for the inboxshot verification pipeline.
//!
//! Everything here is plain data: the id newtypes, the provider/engine/mode
//! enums that identify one unit of verification work, and the error type the
//! pipeline crates hand back to the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Webmail product driven through its web interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Outlook,
    Yahoo,
    Aol,
    Icloud,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Gmail,
        Provider::Outlook,
        Provider::Yahoo,
        Provider::Aol,
        Provider::Icloud,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gmail => "gmail",
            Provider::Outlook => "outlook",
            Provider::Yahoo => "yahoo",
            Provider::Aol => "aol",
            Provider::Icloud => "icloud",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser engine used to drive automation for a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Chromium,
    Firefox,
    Webkit,
}

impl Engine {
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Chromium => "chromium",
            Engine::Firefox => "firefox",
            Engine::Webkit => "webkit",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering color scheme a capture is taken under.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualMode {
    Light,
    Dark,
}

impl VisualMode {
    /// Capture order: light first, then dark, as every job requests both.
    pub const ALL: [VisualMode; 2] = [VisualMode::Light, VisualMode::Dark];

    pub fn as_str(self) -> &'static str {
        match self {
            VisualMode::Light => "light",
            VisualMode::Dark => "dark",
        }
    }
}

impl fmt::Display for VisualMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (provider, engine) combination requested for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProviderPair {
    pub provider: Provider,
    pub engine: Engine,
}

impl ProviderPair {
    pub fn new(provider: Provider, engine: Engine) -> Self {
        Self { provider, engine }
    }
}

impl fmt::Display for ProviderPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.provider, self.engine)
    }
}

/// How the target message is found in the mailbox.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatingHint {
    /// Short unique token embedded in the message subject; fed to the
    /// provider's search UI.
    SubjectToken(String),
    /// Direct message identifier for providers that expose one.
    MessageId(String),
}

impl LocatingHint {
    pub fn subject_token(&self) -> Option<&str> {
        match self {
            LocatingHint::SubjectToken(token) => Some(token),
            LocatingHint::MessageId(_) => None,
        }
    }
}

/// Failure category; the dispatcher decides retry behavior from `kind`
/// and `retriable` alone.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Session establishment or remote browser I/O failed.
    Session,
    /// Target message could not be located/opened with the provider rules.
    Locate,
    /// Capture or mode switch failed after the message was open.
    Capture,
    /// Adaptive fallback path failed as well.
    Fallback,
    /// Artifact upload or record append failed.
    Storage,
    /// Run row never became visible; caller-side ordering bug.
    RunMissing,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Session => "session",
            ErrorKind::Locate => "locate",
            ErrorKind::Capture => "capture",
            ErrorKind::Fallback => "fallback",
            ErrorKind::Storage => "storage",
            ErrorKind::RunMissing => "run_missing",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Error surfaced by every pipeline stage.
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
#[error("{}: {message}", kind.as_str())]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    pub retriable: bool,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retriable = !matches!(kind, ErrorKind::RunMissing);
        Self {
            kind,
            message: message.into(),
            retriable,
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, message)
    }

    pub fn locate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Locate, message)
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capture, message)
    }

    pub fn fallback(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fallback, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn run_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RunMissing, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn is_permanent(&self) -> bool {
        !self.retriable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_missing_is_never_retriable() {
        let err = PipelineError::run_missing("row absent after polling");
        assert!(err.is_permanent());
    }

    #[test]
    fn locate_errors_default_retriable() {
        let err = PipelineError::locate("token not found within 90s");
        assert!(err.retriable);
        assert_eq!(err.kind, ErrorKind::Locate);
    }

    #[test]
    fn visual_modes_capture_light_first() {
        assert_eq!(VisualMode::ALL[0], VisualMode::Light);
        assert_eq!(VisualMode::ALL[1], VisualMode::Dark);
    }

    #[test]
    fn hint_exposes_subject_token_only() {
        let hint = LocatingHint::SubjectToken("tok-123".into());
        assert_eq!(hint.subject_token(), Some("tok-123"));
        let hint = LocatingHint::MessageId("msg-1".into());
        assert_eq!(hint.subject_token(), None);
    }
}
