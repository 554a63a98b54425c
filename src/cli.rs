//! Command-line surface of the worker binary.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

use inboxshot_core_types::{Engine, LocatingHint, Provider, ProviderPair};

#[derive(Parser, Debug)]
#[command(name = "inboxshot", version, about = "Email rendering verification worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the worker pool and process jobs until interrupted.
    Serve(ConfigArgs),
    /// Enqueue one run, wait for it and print the outcome as JSON.
    Run(RunArgs),
    /// Load and validate the configuration, then exit.
    CheckConfig(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Path to a TOML configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Provider/engine combination, e.g. "gmail:chromium". Repeatable.
    #[arg(long = "pair", required = true)]
    pub pairs: Vec<CliPair>,

    /// Reference to the message under verification.
    #[arg(long, default_value = "adhoc")]
    pub email_ref: String,

    /// Reference to the rendered version being checked.
    #[arg(long, default_value = "adhoc")]
    pub version_ref: String,

    /// Unique token embedded in the message subject.
    #[arg(long, conflicts_with = "message_id")]
    pub subject_token: Option<String>,

    /// Direct message identifier.
    #[arg(long)]
    pub message_id: Option<String>,
}

impl RunArgs {
    pub fn hint(&self) -> Result<LocatingHint> {
        match (&self.subject_token, &self.message_id) {
            (Some(token), None) => Ok(LocatingHint::SubjectToken(token.clone())),
            (None, Some(id)) => Ok(LocatingHint::MessageId(id.clone())),
            _ => bail!("exactly one of --subject-token or --message-id is required"),
        }
    }

    pub fn provider_pairs(&self) -> Vec<ProviderPair> {
        self.pairs.iter().map(|pair| pair.0).collect()
    }
}

#[derive(Clone, Debug)]
pub struct CliPair(pub ProviderPair);

impl FromStr for CliPair {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (provider, engine) = value
            .split_once(':')
            .ok_or_else(|| format!("expected provider:engine, got {value:?}"))?;
        let provider = parse_provider(provider)?;
        let engine = parse_engine(engine)?;
        Ok(CliPair(ProviderPair::new(provider, engine)))
    }
}

fn parse_provider(value: &str) -> Result<Provider, String> {
    Provider::ALL
        .iter()
        .copied()
        .find(|provider| provider.as_str() == value)
        .ok_or_else(|| format!("unknown provider {value:?}"))
}

fn parse_engine(value: &str) -> Result<Engine, String> {
    match value {
        "chromium" => Ok(Engine::Chromium),
        "firefox" => Ok(Engine::Firefox),
        "webkit" => Ok(Engine::Webkit),
        other => Err(format!("unknown engine {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_parse_from_provider_colon_engine() {
        let pair: CliPair = "icloud:webkit".parse().unwrap();
        assert_eq!(pair.0.provider, Provider::Icloud);
        assert_eq!(pair.0.engine, Engine::Webkit);

        assert!("gmail".parse::<CliPair>().is_err());
        assert!("gmail:ie11".parse::<CliPair>().is_err());
    }

    #[test]
    fn run_args_require_exactly_one_hint() {
        let args = Cli::parse_from([
            "inboxshot",
            "run",
            "--pair",
            "gmail:chromium",
            "--subject-token",
            "diff-abc123",
        ]);
        match args.command {
            Command::Run(run) => {
                assert!(matches!(
                    run.hint().unwrap(),
                    LocatingHint::SubjectToken(token) if token == "diff-abc123"
                ));
                assert_eq!(run.provider_pairs().len(), 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
