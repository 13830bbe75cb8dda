// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Zerowake CLI
//!
//! Gateway daemon and client commands for the zerowake scale-to-zero
//! control plane.

use clap::{Parser, Subcommand, ValueEnum};

mod client;
mod commands;
mod http;
mod metrics;
mod tui;

const DEFAULT_GATEWAY: &str = "http://127.0.0.1:8000";

/// Zerowake - scale-to-zero control plane for function workloads
#[derive(Parser)]
#[command(name = "zw")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "zerowake.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Orchestration backend used by `zw up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Simulated in-process cluster
    Memory,
    /// Kubernetes API server from the ambient kubeconfig
    Kube,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway and reconciler
    Up {
        /// Print the function table and wait for Ctrl+C
        #[arg(short, long)]
        foreground: bool,

        /// Orchestration backend
        #[arg(long, value_enum, default_value_t = Backend::Memory)]
        backend: Backend,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// List functions declared in the configuration
    List,

    /// Create or update functions on a running gateway
    Apply {
        /// YAML file with a `functions:` list
        file: String,

        /// Gateway base URL
        #[arg(long, default_value = DEFAULT_GATEWAY)]
        gateway: String,
    },

    /// Delete a function from a running gateway
    Delete {
        /// Function ID
        id: String,

        /// Gateway base URL
        #[arg(long, default_value = DEFAULT_GATEWAY)]
        gateway: String,
    },

    /// Show function status
    Stats {
        /// Show TUI dashboard instead of one-shot stats
        #[arg(short, long)]
        dashboard: bool,

        /// Watch mode - continuously update stats
        #[arg(short, long)]
        watch: bool,

        /// Gateway base URL
        #[arg(long, default_value = DEFAULT_GATEWAY)]
        gateway: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Up {
            foreground,
            backend,
        } => commands::up::execute(&cli.config, foreground, backend).await,
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::List => commands::list::execute(&cli.config).await,
        Commands::Apply { file, gateway } => commands::apply::execute(&file, &gateway).await,
        Commands::Delete { id, gateway } => commands::delete::execute(&id, &gateway).await,
        Commands::Stats {
            dashboard,
            watch,
            gateway,
        } => commands::stats::execute(&gateway, watch, dashboard).await,
    }
}
