use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::IdentityArgs;
use crate::config::GatewayConfig;
use crate::identity::{Identity, SystemDirectory, UserDirectory};

#[derive(Debug, Serialize)]
struct IdentityReport {
    user: String,
    uid: u32,
    gid: u32,
    groups: Vec<u32>,
    accepted: bool,
    reason: Option<String>,
}

pub fn cmd_identity(args: IdentityArgs, config: &GatewayConfig) -> Result<()> {
    let directory = SystemDirectory::new();
    let entry = directory
        .lookup_user(&args.user)
        .with_context(|| format!("looking up {}", args.user))?
        .with_context(|| format!("no such user: {}", args.user))?;
    let groups = directory
        .supplementary_groups(&args.user, entry.gid)
        .with_context(|| format!("listing groups of {}", args.user))?;

    let policy = Identity::resolve(&directory, &args.user, config.min_uid, config.min_gid);
    let report = IdentityReport {
        user: args.user,
        uid: entry.uid,
        gid: entry.gid,
        groups,
        accepted: policy.is_ok(),
        reason: policy.err().map(|e| e.to_string()),
    };

    if args.json {
        return super::print_json(&report);
    }

    let groups: Vec<String> = report.groups.iter().map(u32::to_string).collect();
    println!("user:     {}", report.user);
    println!("uid:      {}", report.uid);
    println!("gid:      {}", report.gid);
    println!("groups:   {}", groups.join(","));
    match &report.reason {
        None => println!("policy:   accepted"),
        Some(reason) => println!("policy:   rejected ({reason})"),
    }

    Ok(())
}
