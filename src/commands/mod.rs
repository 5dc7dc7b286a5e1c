pub mod caps;
pub mod identity;
pub mod resolve;
pub mod stat;

// Re-export command functions
pub use caps::cmd_caps;
pub use identity::cmd_identity;
pub use resolve::cmd_resolve;
pub use stat::cmd_stat;

use crate::cli::Cli;
use crate::config::GatewayConfig;

/// Gateway configuration from the global CLI flags.
pub fn config_from_cli(cli: &Cli) -> GatewayConfig {
    GatewayConfig::new().min_uid(cli.min_uid).min_gid(cli.min_gid)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
