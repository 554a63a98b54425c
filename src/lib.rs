//! Worker binary glue: configuration, telemetry and command handling.

pub mod app;
pub mod cli;
pub mod config;
pub mod telemetry;

use anyhow::Result;
use serde_json::json;
use tracing::info;

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::config::AppConfig;

pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => {
            let cfg = AppConfig::load(args.config.as_deref())?;
            App::build(&cfg)?.serve().await
        }
        Command::Run(args) => {
            let cfg = AppConfig::load(args.config.config.as_deref())?;
            let app = App::build(&cfg)?;
            let hint = args.hint()?;
            let request = dispatcher::RunRequest {
                email_ref: args.email_ref.clone(),
                version_ref: args.version_ref.clone(),
                pairs: args.provider_pairs(),
                hint,
            };
            let (run_id, run) = app.run_once(request).await?;
            let artifacts = app.artifacts(run_id).await?;
            let metrics = dispatcher::metrics::snapshot();
            let report = json!({
                "run_id": run_id.to_string(),
                "status": run.status,
                "error": run.error,
                "expected_artifacts": run.expected_artifacts,
                "artifacts": artifacts
                    .iter()
                    .map(|row| {
                        json!({
                            "provider": row.pair.provider,
                            "engine": row.pair.engine,
                            "mode": row.mode,
                            "fallback": row.fallback,
                            "key": row.key,
                            "url": row.url,
                        })
                    })
                    .collect::<Vec<_>>(),
                "jobs": {
                    "started": metrics.jobs_started,
                    "retried": metrics.jobs_retried,
                    "failed": metrics.jobs_failed,
                    "stalled": metrics.jobs_stalled,
                    "fallback_used": metrics.fallback_used,
                },
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::CheckConfig(args) => {
            let cfg = AppConfig::load(args.config.as_deref())?;
            info!(queue = %cfg.queue_name, concurrency = cfg.worker.concurrency,
                  "configuration OK");
            Ok(())
        }
    }
}
