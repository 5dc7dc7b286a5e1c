use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "multiuserctl",
    version,
    about = "Inspect per-thread filesystem impersonation on this host"
)]
pub struct Cli {
    /// Minimum uid that may be impersonated
    #[arg(long, global = true, default_value_t = 500)]
    pub min_uid: u32,

    /// Minimum primary gid that may be impersonated
    #[arg(long, global = true, default_value_t = 500)]
    pub min_gid: u32,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show CAP_SETUID/CAP_SETGID state of the calling thread
    Caps(CapsArgs),
    /// Resolve a username and check it against the minimum-id policy
    Identity(IdentityArgs),
    /// Find the supplementary group that owns the node governing a path
    Resolve(ResolveArgs),
    /// Stat a path through the gateway as a user
    Stat(StatArgs),
}

#[derive(Args, Debug)]
pub struct CapsArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct IdentityArgs {
    /// Username to look up
    pub user: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Username whose groups are tested
    pub user: String,

    /// Path to resolve (need not exist)
    pub path: PathBuf,

    /// Primary gid to use instead of the user's passwd entry
    #[arg(long)]
    pub gid: Option<u32>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct StatArgs {
    /// Username to impersonate
    pub user: String,

    /// Path relative to --root
    pub path: PathBuf,

    /// Directory the request paths are served from
    #[arg(long)]
    pub root: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
