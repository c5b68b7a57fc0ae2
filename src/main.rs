// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use girder::commands;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "girder")]
#[command(author = "Maravilla Labs")]
#[command(version)]
#[command(about = "Watch-mode development orchestrator", long_about = None)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Develop your application in watch mode
    Dev {
        /// Entrypoint to run (defaults to app.ts, index.ts or server.ts
        /// under the source root)
        #[arg(short, long)]
        entrypoint: Option<PathBuf>,
        /// Reflection only: watch and regenerate artifacts without starting
        /// the app server
        #[arg(short, long)]
        reflection: bool,
        /// Pause the runner on start and wait for a debugger at this address
        #[arg(long, value_name = "HOST:PORT", num_args = 0..=1, default_missing_value = "127.0.0.1:9229")]
        inspect_brk: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level when set.
    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) => EnvFilter::try_new(spec),
        Err(_) => EnvFilter::try_new(&cli.log_level),
    }
    .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Dev {
            entrypoint,
            reflection,
            inspect_brk,
        } => commands::dev::run(entrypoint, reflection, inspect_brk).await,
    }
}
