mod agent;
mod config;
mod fix;
mod gemini;
mod github;
mod publish;
mod sentry;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent::FixAgent;
use gemini::GeminiClient;
use github::GithubClient;
use sentry::SentryClient;

/// Batch agent that pulls unresolved Sentry issues, asks Gemini for a
/// corrected version of the faulting file, and opens one GitHub pull
/// request per proposed fix.
///
/// Configuration comes from SENTRY_TOKEN, SENTRY_ORG, SENTRY_PROJECT,
/// GITHUB_TOKEN, GITHUB_REPO and GEMINI_API_KEY, with optional overrides
/// in .sentry-autofix.toml.
#[derive(Parser, Debug)]
#[command(name = "sentry-autofix", version, about)]
struct Cli {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let _cli = Cli::parse();

    info!("loading configuration");
    let config = config::Config::load()?;

    let agent = FixAgent::new(
        SentryClient::new(&config.sentry),
        GithubClient::new(&config.github),
        GeminiClient::new(&config.gemini),
    );

    info!(repo = %config.github.repo, "starting fix run");
    agent.run().await?;

    Ok(())
}
