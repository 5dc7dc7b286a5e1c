use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::backend::{LocalBackend, Request, Response};
use crate::cli::StatArgs;
use crate::config::GatewayConfig;
use crate::gateway::{AsyncGateway, Gateway};
use crate::identity::{ClientEntity, RequestEnv};
use crate::impersonate::Impersonator;

#[derive(Debug, Serialize)]
struct StatReport {
    user: String,
    path: String,
    mode: String,
    uid: u32,
    gid: u32,
    size: u64,
}

pub async fn cmd_stat(args: StatArgs, config: GatewayConfig) -> Result<()> {
    if !args.json {
        info!(user = %args.user, root = %args.root.display(), "stat through gateway");
    }

    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("resolving root {}", args.root.display()))?;
    let impersonator = Impersonator::system(&config);
    let gateway = Gateway::new(Arc::new(LocalBackend::new(root)), impersonator, config)
        .context("starting gateway")?;
    let gateway = AsyncGateway::new(gateway);

    let env = RequestEnv::new(ClientEntity::new("unix").with_name(args.user.clone()));
    let response = gateway
        .handle(
            Some(env),
            Request::Stat {
                path: args.path.clone(),
            },
        )
        .await;

    let st = match response {
        Response::Attr(st) => st,
        Response::Error { errno } => bail!(
            "stat {} as {} failed: {}",
            args.path.display(),
            args.user,
            std::io::Error::from_raw_os_error(errno)
        ),
        other => bail!("unexpected response: {other:?}"),
    };

    let report = StatReport {
        user: args.user,
        path: args.path.display().to_string(),
        mode: format!("{:o}", st.mode),
        uid: st.uid,
        gid: st.gid,
        size: st.size,
    };

    if args.json {
        return super::print_json(&report);
    }

    println!(
        "{:<30} {:<8} {:<8} {:<8} {:<10}",
        "PATH", "MODE", "UID", "GID", "SIZE"
    );
    println!("{}", "-".repeat(68));
    println!(
        "{:<30} {:<8} {:<8} {:<8} {:<10}",
        report.path, report.mode, report.uid, report.gid, report.size
    );

    Ok(())
}
