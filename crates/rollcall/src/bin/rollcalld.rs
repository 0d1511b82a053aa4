//! `rollcalld`: the Rollcall attendance server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rollcall::{RollcallConfig, RollcallError, RollcallServerBuilder};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcalld")]
#[command(author, version, about = "Live attendance sessions with rotating QR tokens", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides `server.bind`)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), RollcallError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RollcallConfig::load(path)?,
        None => RollcallConfig::default(),
    };

    let mut server_config = config.server_config();
    if let Some(bind) = cli.bind {
        server_config.bind_addr = bind;
    }
    if config.sessions.token_secret.is_none() {
        info!("no token secret configured, using a random key for this process");
    }

    let server = RollcallServerBuilder::new()
        .config(server_config)
        .token_generator(Arc::new(config.token_generator()?))
        .build(config.authenticator()?, config.rosters())
        .await?;

    let addr = server.local_addr()?;
    info!(
        %addr,
        classes = config.classes.len(),
        principals = config.principals.len(),
        "rollcalld ready"
    );

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await
}
