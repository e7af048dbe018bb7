use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use sysminer_agent::config::AgentConfig;
use sysminer_agent::registry::ModuleRegistry;
use sysminer_agent::{signals, Agent};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Host metrics collection agent.
#[derive(Debug, Parser)]
#[command(name = "sysminerd", version, about)]
struct Cli {
    /// Agent configuration file
    #[arg(short, long, default_value = "config/agent.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sysminer=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(&cli.config)?;
    tracing::info!(config = %cli.config.display(), "sysminerd starting");

    let registry = ModuleRegistry::default();
    let agent = Agent::start(&config, &registry).await?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signals::cancel_on_signal(signal_token.clone()).await {
            tracing::error!(error = %e, "Signal handling failed, shutting down");
            signal_token.cancel();
        }
    });

    let report = agent.run(cancel).await;
    if !report.leaked.is_empty() {
        tracing::warn!(leaked = ?report.leaked, "Some collectors were still running at exit");
    }
    tracing::info!("sysminerd stopped");
    Ok(())
}
