//! Layered application configuration: built-in defaults, an optional file,
//! then `INBOXSHOT_*` environment overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub queue_name: String,
    pub worker: WorkerSettings,
    pub browser: BrowserSettings,
    /// Omit to run without session seeding (fresh logins every time).
    pub state_cache: Option<StateCacheSettings>,
    /// Omit to keep screenshots in process memory.
    pub storage: Option<StorageSettings>,
    /// Omit to drive the fallback tier with the built-in scripted planner.
    pub planner: Option<PlannerSettings>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
}

impl WorkerSettings {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BrowserSettings {
    /// Vendor websocket endpoint for remote browser sessions.
    pub ws_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StateCacheSettings {
    pub base_url: String,
    pub token: String,
    /// "production", "preview" or anything else for dev.
    pub tier: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageSettings {
    pub base_url: String,
    pub token: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlannerSettings {
    pub endpoint: String,
    pub api_key: String,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("queue_name", "inboxshot")?
            .set_default("worker.concurrency", 3)?
            .set_default("worker.max_attempts", 3)?
            .set_default("worker.backoff_base_secs", 30)?
            .set_default("browser.ws_url", "")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("INBOXSHOT").separator("__"));

        let cfg: AppConfig = builder
            .build()
            .context("assembling configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Short token prefix for startup logging. Never log whole secrets.
    pub fn secret_prefix(secret: &str) -> String {
        let head: String = secret.chars().take(4).collect();
        format!("{head}...")
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.worker.concurrency > 0, "worker.concurrency must be > 0");
        anyhow::ensure!(self.worker.max_attempts > 0, "worker.max_attempts must be > 0");
        anyhow::ensure!(
            !self.browser.ws_url.is_empty(),
            "browser.ws_url is required"
        );
        Ok(())
    }
}
