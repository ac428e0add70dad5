//! pack - zero-config build configuration for JavaScript projects
//!
//! Merges command-line flags, an optional `pack.json` and defaults into one
//! set of options, derives a bundler configuration from them and hands it to
//! an external build toolchain.
//!
//! # Modes
//! - `pack --init` scaffolds a project
//! - `pack -t` runs the test suite
//! - `pack -w` starts the development server
//! - `pack -n -w` rebuilds and restarts a node server
//! - `pack` builds once for production

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pack_lib::Cli;

/// Initialize the logging/tracing system
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "pack=debug,pack_lib=debug"
    } else {
        "pack=info,pack_lib=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Err(e) = cli.execute().await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
