//! Errata manager
//!
//! Serves the export API, or runs a one-shot system re-evaluation.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use errata_manager::config::Config;
use errata_manager::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Publish re-evaluation messages for stored systems, then exit.
    ///
    /// A running server exposes the same job at `POST /reevaluate/{key}`.
    Reevaluate {
        /// Restrict to systems attached to this repository. Repeatable.
        #[arg(long = "repo")]
        repos: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    errata_manager::init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    info!(port = config.port, "Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Reevaluate { repos } => reevaluate(config, &repos).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    let app = errata_manager::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn reevaluate(config: Config, repos: &[String]) -> Result<()> {
    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    let sent = state.reevaluation().run(repos).await?;

    info!(sent, "re-evaluation finished");
    Ok(())
}
