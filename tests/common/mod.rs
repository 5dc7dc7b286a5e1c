//! Shared fixtures for multiuser integration tests.

// Allow dead code - not every test file uses every helper
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

use multiuser::config::GatewayConfig;
use multiuser::gateway::Gateway;
use multiuser::identity::{ClientEntity, RequestEnv};
use multiuser::impersonate::Impersonator;
use multiuser::testing::{FakeBackend, FakeCredentials, FakeDirectory};
use tracing_subscriber::EnvFilter;

/// Initialize tracing once for the test process.
static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    });
}

/// Global counter for unique test IDs
static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique scratch directory path under /tmp (not created).
pub fn unique_dir(prefix: &str) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    PathBuf::from(format!("/tmp/{}-{}-{}", prefix, std::process::id(), id))
}

/// The site used throughout: alice (1001, primary 900) belongs to groups 700
/// and 800, bob (1002, primary 900) only to 700.
pub fn site_directory() -> FakeDirectory {
    FakeDirectory::new()
        .user("alice", 1001, 900, &[700, 800])
        .user("bob", 1002, 900, &[700])
        .user("carol", 1003, 901, &[])
        .user("nobodyish", 99, 99, &[])
}

/// `/data/exp1` owned by group 800 (0770), `/data/shared` set-group-id 700.
pub fn site_backend() -> FakeBackend {
    FakeBackend::new()
        .dir("/", 0, 0, 0o755)
        .dir("/data", 0, 0, 0o755)
        .dir("/data/exp1", 0, 800, 0o770)
        .dir("/data/shared", 0, 700, 0o2770)
        .file("/data/exp1/results.csv", 1003, 800, 0o660)
}

pub fn fake_impersonator(config: &GatewayConfig) -> Impersonator {
    Impersonator::new(
        Arc::new(FakeCredentials::new()),
        Arc::new(site_directory()),
        config,
    )
}

/// Gateway over the site tree with the calling thread reset to root.
pub fn site_gateway(config: GatewayConfig) -> Gateway<FakeBackend> {
    init_tracing();
    FakeCredentials::reset_thread();
    let impersonator = fake_impersonator(&config);
    match Gateway::new(Arc::new(site_backend()), impersonator, config) {
        Ok(gateway) => gateway,
        Err(e) => panic!("gateway failed to start: {e}"),
    }
}

pub fn env_for(user: &str) -> RequestEnv {
    RequestEnv::new(ClientEntity::new("ztn").with_name(user))
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}
