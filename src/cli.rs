use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inventory & sales analytics service with a trustworthy chat interface.
#[derive(Parser)]
#[command(name = "stocksense", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP API server
    Api {
        /// Host to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Directory for the SQLite database
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },

    /// Seed a demo tenant (core tables plus mart rows)
    Seed {
        /// Directory for the SQLite database
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },

    /// Print the unified chat-response JSON schema
    Schema,
}
