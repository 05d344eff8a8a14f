use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod extract;
mod fetch;
mod google;
mod models;
mod notebook;
mod rewrite;
mod sync;
mod taskline;

use crate::config::Config;

/// Synchronize `@todo` lines in a Quiver note library with Google Tasks.
#[derive(Parser)]
#[command(name = "quiversync", version, about)]
struct Cli {
    /// Config file location.
    #[arg(long, env = "QUIVERSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "quiversync=debug"
    } else {
        "quiversync=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("QUIVERSYNC_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref());

    match sync::run(&config) {
        Ok(report) if report.is_noop() => {
            println!("nothing to sync");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "sync failed");
            ExitCode::FAILURE
        }
    }
}
