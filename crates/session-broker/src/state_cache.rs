//! Read-only client for the login-state cache.
//!
//! A separate headed process produces one storage-state blob per
//! (provider, engine) pair. This side only fetches: a missing or failing
//! blob is a valid state and the session proceeds unauthenticated.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use inboxshot_core_types::{Engine, Provider};

/// Deployment tier prefix baked into the blob keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnvTier {
    Prod,
    Preview,
    Dev,
}

impl EnvTier {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvTier::Prod => "prod",
            EnvTier::Preview => "preview",
            EnvTier::Dev => "dev",
        }
    }

    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some("production") => EnvTier::Prod,
            Some("preview") => EnvTier::Preview,
            _ => EnvTier::Dev,
        }
    }
}

/// Browser storage state as produced by the cache process. Only the cookie
/// jar is seeded into fresh contexts; origin storage is ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub cookies: Vec<StateCookie>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StateCacheConfig {
    pub base_url: String,
    pub token: String,
    pub tier: EnvTier,
    pub request_timeout: Duration,
}

impl StateCacheConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, tier: EnvTier) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            tier,
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct SessionStateCache {
    cfg: StateCacheConfig,
    http: reqwest::Client,
}

impl SessionStateCache {
    pub fn new(cfg: StateCacheConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
        }
    }

    pub fn blob_key(&self, provider: Provider, engine: Engine) -> String {
        format!(
            "{}/sessions/{}-{}.json",
            self.cfg.tier.as_str(),
            provider,
            engine
        )
    }

    /// Fetch cached storage state for the pair. `None` covers every failure
    /// mode: absent blob, transport error, unparsable payload.
    pub async fn fetch(&self, provider: Provider, engine: Engine) -> Option<SessionState> {
        let key = self.blob_key(provider, engine);
        let url = format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), key);
        debug!(target: "session-broker", %provider, %engine, %key, "fetching storage state");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.cfg.token)
            .timeout(self.cfg.request_timeout)
            .send()
            .await;

        let response = match response {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(target: "session-broker", status = %resp.status(), %key,
                       "storage state absent; proceeding without it");
                return None;
            }
            Err(err) => {
                debug!(target: "session-broker", %err, %key,
                       "storage state fetch failed; proceeding without it");
                return None;
            }
        };

        match response.json::<SessionState>().await {
            Ok(state) => Some(state),
            Err(err) => {
                debug!(target: "session-broker", %err, %key, "storage state unparsable; ignoring");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_keys_carry_tier_and_pair() {
        let cache = SessionStateCache::new(StateCacheConfig::new(
            "https://blobs.example.com/sessions-bucket",
            "token",
            EnvTier::Preview,
        ));
        assert_eq!(
            cache.blob_key(Provider::Gmail, Engine::Chromium),
            "preview/sessions/gmail-chromium.json"
        );
        assert_eq!(
            cache.blob_key(Provider::Icloud, Engine::Webkit),
            "preview/sessions/icloud-webkit.json"
        );
    }

    #[test]
    fn tier_resolution_defaults_to_dev() {
        assert_eq!(EnvTier::from_env_value(Some("production")), EnvTier::Prod);
        assert_eq!(EnvTier::from_env_value(Some("preview")), EnvTier::Preview);
        assert_eq!(EnvTier::from_env_value(Some("local")), EnvTier::Dev);
        assert_eq!(EnvTier::from_env_value(None), EnvTier::Dev);
    }

    #[test]
    fn state_parses_with_missing_optional_fields() {
        let raw = r#"{ "cookies": [ { "name": "sid", "value": "abc", "domain": ".example.com" } ] }"#;
        let state: SessionState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.cookies.len(), 1);
        assert_eq!(state.cookies[0].path, "");
        assert!(!state.cookies[0].http_only);
    }
}
