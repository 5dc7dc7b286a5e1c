use anyhow::Result;
use clap::Parser;
use multiuser::cli::{Cli, Commands};
use multiuser::commands;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = commands::config_from_cli(&cli);

    let result = match cli.cmd {
        Commands::Caps(args) => commands::cmd_caps(args),
        Commands::Identity(args) => commands::cmd_identity(args, &config),
        Commands::Resolve(args) => commands::cmd_resolve(args, &config),
        Commands::Stat(args) => commands::cmd_stat(args, config).await,
    };

    if let Err(e) = &result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }

    result
}
