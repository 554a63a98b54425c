use anyhow::Result;
use clap::Parser;

use inboxshot_cli::cli::Cli;
use inboxshot_cli::{execute, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("info,dispatcher=info,session_broker=info");
    let cli = Cli::parse();
    execute(cli).await
}
