use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::CapsArgs;
use crate::credentials::{CapabilityGate, KernelCredentials, ThreadCredentials};

#[derive(Debug, Serialize)]
struct CapsReport {
    fsuid: u32,
    fsgid: u32,
    setuid_permitted: bool,
    setuid_effective: bool,
    setgid_permitted: bool,
    setgid_effective: bool,
    can_impersonate: bool,
}

pub fn cmd_caps(args: CapsArgs) -> Result<()> {
    let creds = KernelCredentials::new();
    let state = CapabilityGate::inspect(&creds).context("reading thread capabilities")?;

    let report = CapsReport {
        fsuid: creds.fsuid(),
        fsgid: creds.fsgid(),
        setuid_permitted: state.setuid_permitted,
        setuid_effective: state.setuid_effective,
        setgid_permitted: state.setgid_permitted,
        setgid_effective: state.setgid_effective,
        can_impersonate: state.is_permitted(),
    };

    if args.json {
        return super::print_json(&report);
    }

    let yn = |b: bool| if b { "yes" } else { "no" };
    println!("{:<12} {:<10} {:<10}", "CAPABILITY", "PERMITTED", "EFFECTIVE");
    println!("{}", "-".repeat(34));
    println!(
        "{:<12} {:<10} {:<10}",
        "CAP_SETUID",
        yn(report.setuid_permitted),
        yn(report.setuid_effective)
    );
    println!(
        "{:<12} {:<10} {:<10}",
        "CAP_SETGID",
        yn(report.setgid_permitted),
        yn(report.setgid_effective)
    );
    println!();
    println!("fsuid={} fsgid={}", report.fsuid, report.fsgid);
    println!("impersonation: {}", if report.can_impersonate { "available" } else { "disabled" });

    Ok(())
}
