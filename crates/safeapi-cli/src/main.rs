//! Safe API CLI entry point

use clap::Parser;
use safeapi_cli::commands::load_config;
use safeapi_cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    // Logging level from flags, else from config when it loads
    let configured = load_config(cli.config.as_deref())
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "warn".to_string());
    let filter = EnvFilter::try_new(cli.log_level(&configured)).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    cli.execute().to_exit_code()
}
