pub mod commands;
pub mod config;
pub mod device;
pub mod serial;

use clap::Parser;

/// Command-line entry point used by the `quantum-link` binary.
pub async fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = commands::Cli::parse();
    log::info!("quantum-link {} started", env!("CARGO_PKG_VERSION"));
    commands::execute(cli).await
}
