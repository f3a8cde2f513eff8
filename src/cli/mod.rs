//! CLI commands

mod list;
mod serve;

pub use list::list;
pub use serve::serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// lite-gateway - OpenAI-compatible gateway for local LLM runtimes
#[derive(Parser)]
#[command(name = "lite-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Gateway config file (YAML or JSON); environment variables override it
        #[arg(long, short, env = "LITE_GATEWAY_CONFIG")]
        config: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, short)]
        port: Option<u16>,

        /// Load these models before accepting requests
        #[arg(long, value_delimiter = ',')]
        preload: Vec<String>,
    },

    /// List configured models
    List {
        /// Gateway config file (YAML or JSON)
        #[arg(long, short, env = "LITE_GATEWAY_CONFIG")]
        config: Option<PathBuf>,

        /// Show detailed information
        #[arg(long, short)]
        verbose: bool,
    },
}
