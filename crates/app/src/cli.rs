//! Command line arguments
//!
//! Flags override values from the config file, which override defaults.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use relay_net::{ClientConfig, Config, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Minimal TCP packet relay", long_about = None)]
pub struct Cli {
    /// TOML config file with [server] and [client] sections
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server until Ctrl+C
    Serve(ServeArgs),
    /// Connect to a relay and chat over stdin/stdout
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind. Use 0 for an ephemeral port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<u32>,
}

impl ServeArgs {
    pub fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        config
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Relay host
    #[arg(long)]
    pub host: Option<String>,

    /// Relay port
    #[arg(long)]
    pub port: Option<u16>,

    /// Name stamped on every packet sent
    #[arg(long)]
    pub emitter: Option<String>,
}

impl ConnectArgs {
    pub fn apply(&self, mut config: ClientConfig) -> ClientConfig {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(emitter) = &self.emitter {
            config.emitter = emitter.clone();
        }
        config
    }
}

impl Cli {
    /// Load the config file if one was given
    pub fn load_config(&self) -> relay_net::Result<Config> {
        match &self.config {
            Some(path) => Config::load(path),
            None => Ok(Config::default()),
        }
    }
}
