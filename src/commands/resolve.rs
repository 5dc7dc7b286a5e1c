use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::backend::LocalBackend;
use crate::cli::ResolveArgs;
use crate::config::GatewayConfig;
use crate::impersonate::Impersonator;

#[derive(Debug, Serialize)]
struct ResolveReport {
    user: String,
    path: String,
    primary_gid: u32,
    gid: Option<u32>,
    sticky_gid: bool,
    governing: Option<String>,
    error: Option<String>,
}

pub fn cmd_resolve(args: ResolveArgs, config: &GatewayConfig) -> Result<()> {
    if !args.json {
        info!(user = %args.user, path = %args.path.display(), "resolving supplementary group");
    }

    let impersonator = Impersonator::system(config);
    let primary_gid = match args.gid {
        Some(gid) => gid,
        None => {
            impersonator
                .directory()
                .lookup_user(&args.user)
                .with_context(|| format!("looking up {}", args.user))?
                .with_context(|| format!("no such user: {}", args.user))?
                .gid
        }
    };

    // Host paths are inspected as-is.
    let backend = LocalBackend::new("/");
    let result =
        impersonator.resolve_supplementary_group(&backend, &args.user, primary_gid, &args.path);

    let report = match &result {
        Ok(res) => ResolveReport {
            user: args.user.clone(),
            path: args.path.display().to_string(),
            primary_gid,
            gid: Some(res.gid),
            sticky_gid: res.sticky_gid,
            governing: Some(res.governing.display().to_string()),
            error: None,
        },
        Err(e) => ResolveReport {
            user: args.user.clone(),
            path: args.path.display().to_string(),
            primary_gid,
            gid: None,
            sticky_gid: false,
            governing: None,
            error: Some(format!("{} ({})", e, e.kind())),
        },
    };

    if args.json {
        return super::print_json(&report);
    }

    match (&report.gid, &report.error) {
        (Some(gid), _) => {
            println!("group:    {gid}");
            println!("node:     {}", report.governing.as_deref().unwrap_or("-"));
            println!("setgid:   {}", if report.sticky_gid { "yes" } else { "no" });
        }
        (None, Some(error)) => println!("no group: {error}"),
        (None, None) => {}
    }

    Ok(())
}
