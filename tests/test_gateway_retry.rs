//! End-to-end request handling: identity scope, EACCES retry with a
//! supplementary group, group reset on new nodes.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use multiuser::backend::{Request, Response};
use multiuser::config::GatewayConfig;
use multiuser::gateway::{mkdir_mode, AsyncGateway};
use multiuser::identity::{ClientEntity, RequestEnv};
use multiuser::testing::FakeCredentials;

use common::{env_for, site_gateway};

fn create(path: &str) -> Request {
    Request::Create {
        path: PathBuf::from(path),
        mode: 0o640,
    }
}

#[test]
fn test_create_in_group_directory() {
    let gw = site_gateway(GatewayConfig::default());

    let resp = gw.handle(Some(&env_for("alice")), &create("/data/exp1/out.dat"));
    assert!(resp.is_ok());

    let node = gw.backend().node("/data/exp1/out.dat").unwrap();
    assert_eq!((node.uid, node.gid), (1001, 900));
    assert_eq!(FakeCredentials::current(), (0, 0, vec![]));
}

#[test]
fn test_create_in_setgid_directory_inherits() {
    let gw = site_gateway(GatewayConfig::default());

    let resp = gw.handle(Some(&env_for("bob")), &create("/data/shared/notes.txt"));
    assert!(resp.is_ok());
    assert_eq!(gw.backend().node("/data/shared/notes.txt").unwrap().gid, 700);
}

#[test]
fn test_denied_user_sees_eacces() {
    let gw = site_gateway(GatewayConfig::default());

    let resp = gw.handle(Some(&env_for("carol")), &create("/data/exp1/out.dat"));
    assert_eq!(resp, Response::error(libc::EACCES));
    assert_eq!(resp.result_code(), -libc::EACCES);
    assert!(gw.backend().node("/data/exp1/out.dat").is_none());
}

#[test]
fn test_write_existing_file_via_group() {
    let gw = site_gateway(GatewayConfig::default());

    let resp = gw.handle(
        Some(&env_for("alice")),
        &Request::Write {
            path: PathBuf::from("/data/exp1/results.csv"),
            offset: 0,
            data: b"a,b\n".to_vec(),
        },
    );
    assert_eq!(resp, Response::Written(4));
    assert_eq!(gw.backend().contents("/data/exp1/results.csv").unwrap(), b"a,b\n");
    assert_eq!(
        gw.backend().seen_identities(),
        vec![(1001, 900), (1001, 800)]
    );
}

#[test]
fn test_readdir_after_retry() {
    let gw = site_gateway(GatewayConfig::default());

    let resp = gw.handle(
        Some(&env_for("alice")),
        &Request::ReadDir {
            path: PathBuf::from("/data/exp1"),
        },
    );
    assert_eq!(resp, Response::Entries(vec!["results.csv".to_string()]));
}

#[test]
fn test_unlink_then_stat() {
    let gw = site_gateway(GatewayConfig::default());
    let alice = env_for("alice");

    let resp = gw.handle(
        Some(&alice),
        &Request::Unlink {
            path: PathBuf::from("/data/exp1/results.csv"),
        },
    );
    assert!(resp.is_ok());

    let resp = gw.handle(
        Some(&alice),
        &Request::Stat {
            path: PathBuf::from("/data/exp1/results.csv"),
        },
    );
    assert_eq!(resp.errno(), Some(libc::ENOENT));
}

#[test]
fn test_unsupported_operation() {
    let gw = site_gateway(GatewayConfig::default());
    let resp = gw.handle(
        Some(&env_for("alice")),
        &Request::Rename {
            from: PathBuf::from("/data/exp1/results.csv"),
            to: PathBuf::from("/data/exp1/old.csv"),
        },
    );
    assert_eq!(resp, Response::error(libc::ENOSYS));
}

#[test]
fn test_gsi_dn_runs_anonymous() {
    let gw = site_gateway(GatewayConfig::default());
    let env = RequestEnv::new(ClientEntity::new("gsi").with_name("/DC=org/CN=Alice"));

    let resp = gw.handle(Some(&env), &create("/data/exp1/anon.dat"));
    assert!(resp.is_ok());
    assert_eq!(gw.backend().node("/data/exp1/anon.dat").unwrap().uid, 0);
}

#[test]
fn test_mkdir_mode_kept_without_umask() {
    assert_eq!(mkdir_mode(0o700, Some(0o027)), 0o777);

    let gw = site_gateway(GatewayConfig::default());
    let resp = gw.handle(
        Some(&env_for("alice")),
        &Request::Mkdir {
            path: PathBuf::from("/data/exp1/private"),
            mode: 0o700,
        },
    );
    assert!(resp.is_ok());
    // No umask configured: the requested mode is kept
    assert_eq!(gw.backend().node("/data/exp1/private").unwrap().mode & 0o777, 0o700);
}

#[tokio::test]
async fn test_async_gateway_handles_concurrent_requests() {
    let gw = AsyncGateway::new(site_gateway(GatewayConfig::default()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let gw = gw.clone();
        handles.push(tokio::spawn(async move {
            gw.handle(
                Some(env_for("alice")),
                create(&format!("/data/exp1/part-{i}")),
            )
            .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    let backend = Arc::clone(gw.gateway().backend());
    for i in 0..8 {
        let node = backend.node(&format!("/data/exp1/part-{i}")).unwrap();
        assert_eq!(node.gid, 900);
    }
}
