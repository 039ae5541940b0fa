//! Relay - minimal TCP packet relay
//!
//! `relay serve` runs the server, `relay connect` joins one as a chat client.

use clap::Parser;
use relay_net::{Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chat;
mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let result = match &cli.command {
        Command::Serve(args) => serve(args.apply(config.server)).await,
        Command::Connect(args) => chat::run(args.apply(config.client)).await,
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn serve(config: ServerConfig) -> relay_net::Result<()> {
    let server = Server::start(config).await?;
    println!("Relay listening on {}", server.local_addr());

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
    }

    server.stop();
    server.wait_stopped().await;
    Ok(())
}
