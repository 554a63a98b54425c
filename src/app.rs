//! Wires configuration into a running worker pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use capture_engine::{
    ArtifactStore, BlobStoreConfig, CaptureEngine, HttpBlobStore, MemoryArtifactStore,
};
use dispatcher::{
    create_run, registry, EnqueueOptions, JobPipeline, JobQueue, QueueConfig, RunRequest,
    WorkerConfig, WorkerPool,
};
use fallback_agent::{
    FallbackAgent, FallbackConfig, FallbackPlanner, HttpPlanner, HttpPlannerConfig, MockPlanner,
};
use inboxshot_core_types::RunId;
use mail_locator::{EmailLocator, LocatorConfig};
use run_store::{MemoryRunStore, Run, RunAggregator, RunStore};
use session_broker::{
    BrokerConfig, EnvTier, SessionBroker, SessionStateCache, StateCacheConfig, StateSource,
};

use crate::config::AppConfig;

pub struct App {
    queue_name: String,
    pool: Arc<WorkerPool>,
    runs: Arc<dyn RunStore>,
}

impl App {
    /// Assemble the whole pipeline from configuration and register the pool
    /// under the configured queue name.
    pub fn build(cfg: &AppConfig) -> Result<Self> {
        let runs: Arc<dyn RunStore> = Arc::new(MemoryRunStore::new());

        let state_source: Option<Arc<dyn StateSource>> = cfg.state_cache.as_ref().map(|sc| {
            let tier = EnvTier::from_env_value(sc.tier.as_deref());
            Arc::new(SessionStateCache::new(StateCacheConfig::new(
                sc.base_url.clone(),
                sc.token.clone(),
                tier,
            ))) as Arc<dyn StateSource>
        });
        let sessions = Arc::new(SessionBroker::new(
            BrokerConfig {
                ws_url: cfg.browser.ws_url.clone(),
                ..BrokerConfig::default()
            },
            state_source,
        ));

        let artifacts: Arc<dyn ArtifactStore> = match &cfg.storage {
            Some(storage) => Arc::new(HttpBlobStore::new(BlobStoreConfig {
                base_url: storage.base_url.clone(),
                token: storage.token.clone(),
            })),
            None => Arc::new(MemoryArtifactStore::new()),
        };

        let planner: Arc<dyn FallbackPlanner> = match &cfg.planner {
            Some(planner) => Arc::new(HttpPlanner::new(HttpPlannerConfig::new(
                planner.endpoint.clone(),
                planner.api_key.clone(),
            ))?),
            None => Arc::new(MockPlanner),
        };

        let pipeline = Arc::new(JobPipeline::new(
            sessions,
            EmailLocator::new(LocatorConfig::default()),
            CaptureEngine::default(),
            FallbackAgent::new(planner, FallbackConfig::default()),
            artifacts,
            runs.clone(),
        ));

        let queue = Arc::new(JobQueue::new(QueueConfig::default()));
        let pool = Arc::new(WorkerPool::new(
            queue,
            pipeline,
            RunAggregator::new(runs.clone()),
            runs.clone(),
            WorkerConfig {
                concurrency: cfg.worker.concurrency,
                enqueue: EnqueueOptions {
                    max_attempts: cfg.worker.max_attempts,
                    backoff_base: cfg.worker.backoff_base(),
                    ..EnqueueOptions::default()
                },
                ..WorkerConfig::default()
            },
        ));
        let pool = registry::register(&cfg.queue_name, pool);

        let state_cache_token = cfg
            .state_cache
            .as_ref()
            .map(|sc| AppConfig::secret_prefix(&sc.token))
            .unwrap_or_else(|| "none".to_string());
        let storage_token = cfg
            .storage
            .as_ref()
            .map(|s| AppConfig::secret_prefix(&s.token))
            .unwrap_or_else(|| "none".to_string());
        info!(
            queue = %cfg.queue_name,
            concurrency = cfg.worker.concurrency,
            max_attempts = cfg.worker.max_attempts,
            browser_ws = %cfg.browser.ws_url,
            state_cache_token = %state_cache_token,
            storage_token = %storage_token,
            planner = cfg.planner.is_some(),
            "effective configuration"
        );

        Ok(Self {
            queue_name: cfg.queue_name.clone(),
            pool,
            runs,
        })
    }

    /// Run until interrupted.
    pub async fn serve(&self) -> Result<()> {
        let handles = self.pool.start();
        info!("worker pool running; press ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        registry::deregister(&self.queue_name);
        self.pool.shutdown();
        for handle in handles {
            handle.await?;
        }
        Ok(())
    }

    /// One-shot mode: enqueue a single run, drain it, report its final row.
    pub async fn run_once(&self, request: RunRequest) -> Result<(RunId, Run)> {
        let run_id = create_run(&self.runs, &self.pool.queue(), request).await?;
        let handles = self.pool.start();
        while !self.pool.is_drained() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.pool.shutdown();
        for handle in handles {
            handle.await?;
        }
        let run = self
            .runs
            .get_run(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} vanished"))?;
        Ok((run_id, run))
    }

    pub async fn artifacts(&self, run_id: RunId) -> Result<Vec<run_store::ArtifactRow>> {
        Ok(self.runs.artifacts_for_run(run_id).await?)
    }
}
