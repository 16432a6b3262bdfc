#![cfg_attr(not(test), forbid(unsafe_code))]

//! Entry point for the Lodgeline server binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;

/// Lodgeline messaging server
#[derive(Parser, Debug)]
#[command(name = "lodgeline-server")]
#[command(about = "Guest/host messaging server with an embedded real-time hub", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Port to bind, overriding the configuration file
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a YAML or JSON configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

async fn handle_serve_command(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved_config = Config::load_config(config, port)?;
    server::server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    match Cli::parse().command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}
