//! Identity scope behaviour through the public API with simulated credentials.

mod common;

use std::sync::Arc;

use multiuser::config::GatewayConfig;
use multiuser::credentials::IdentityGuard;
use multiuser::identity::{ClientEntity, IdentityError, Principal, RequestEnv};
use multiuser::impersonate::Impersonator;
use multiuser::testing::{FakeCredentials, FakeDirectory};

use common::{fake_impersonator, init_tracing};

#[test]
fn test_scope_switches_and_restores() {
    init_tracing();
    FakeCredentials::reset_thread();
    let imp = fake_impersonator(&GatewayConfig::default());

    let inside = imp
        .with_identity(&Principal::user("alice"), FakeCredentials::current)
        .unwrap();
    assert_eq!(inside, (1001, 900, vec![900, 700, 800]));
    assert_eq!(FakeCredentials::current(), (0, 0, vec![]));
    assert!(!IdentityGuard::is_active());
}

#[test]
fn test_switch_order_gid_first() {
    init_tracing();
    FakeCredentials::reset_thread();
    let imp = fake_impersonator(&GatewayConfig::default());

    imp.with_identity(&Principal::user("bob"), || ()).unwrap();
    assert_eq!(
        FakeCredentials::calls(),
        vec![
            "setfsgid(900)",
            "setfsuid(1002)",
            "setgroups([900, 700])",
            "setfsuid(0)",
            "setfsgid(0)",
            "setgroups([])",
        ]
    );
}

#[test]
fn test_panic_inside_scope_restores() {
    init_tracing();
    FakeCredentials::reset_thread();
    let imp = fake_impersonator(&GatewayConfig::default());

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        imp.with_identity(&Principal::user("alice"), || panic!("backend exploded"))
    }));
    assert!(result.is_err());
    assert_eq!(FakeCredentials::current(), (0, 0, vec![]));

    // The thread is usable again
    imp.with_identity(&Principal::user("bob"), || ()).unwrap();
}

#[test]
fn test_minimum_id_policy() {
    init_tracing();
    FakeCredentials::reset_thread();
    let imp = fake_impersonator(&GatewayConfig::default());

    let err = imp.identity("nobodyish").unwrap_err();
    assert!(matches!(err, IdentityError::SystemUid { uid: 99, .. }));

    let strict = fake_impersonator(&GatewayConfig::new().min_uid(1002));
    assert!(matches!(
        strict.identity("alice"),
        Err(IdentityError::SystemUid { uid: 1001, .. })
    ));
    assert_eq!(strict.identity("bob").unwrap().uid, 1002);

    let gid_policy = fake_impersonator(&GatewayConfig::new().min_gid(901));
    assert!(matches!(
        gid_policy.identity("alice"),
        Err(IdentityError::SystemGid { gid: 900, .. })
    ));
}

#[test]
fn test_unknown_user_is_denied_not_anonymous() {
    init_tracing();
    FakeCredentials::reset_thread();
    let imp = fake_impersonator(&GatewayConfig::default());

    let err = imp
        .with_identity(&Principal::user("mallory"), || ())
        .unwrap_err();
    assert!(matches!(err, IdentityError::UnknownUser(_)));
    assert_eq!(err.errno(), libc::EACCES);
    assert!(FakeCredentials::calls().is_empty());
}

#[test]
fn test_principal_from_request_env() {
    let token = RequestEnv::new(
        ClientEntity::new("ztn")
            .with_name("svc-account")
            .with_attribute("request.name", "alice"),
    );
    assert_eq!(token.principal().unwrap(), Principal::user("alice"));

    let unmapped_gsi = RequestEnv::new(ClientEntity::new("gsi").with_name("/DC=org/CN=Alice"));
    assert_eq!(unmapped_gsi.principal().unwrap(), Principal::Anonymous);

    let mapped_gsi = RequestEnv::new(
        ClientEntity::new("gsi")
            .with_name("alice")
            .with_attribute("gridmap.name", "1"),
    );
    assert_eq!(mapped_gsi.principal().unwrap(), Principal::user("alice"));

    assert!(matches!(
        RequestEnv::without_client().principal(),
        Err(IdentityError::NoPrincipal)
    ));
}

#[test]
fn test_threads_are_independent() {
    init_tracing();
    let imp = Arc::new(fake_impersonator(&GatewayConfig::default()));

    let handles: Vec<_> = ["alice", "bob", "carol"]
        .into_iter()
        .map(|user| {
            let imp = Arc::clone(&imp);
            std::thread::spawn(move || {
                FakeCredentials::reset_thread();
                let seen = imp
                    .with_identity(&Principal::user(user), || {
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        imp.credentials().fsuid()
                    })
                    .unwrap();
                (seen, imp.credentials().fsuid())
            })
        })
        .collect();

    let mut results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    results.sort();
    assert_eq!(results, vec![(1001, 0), (1002, 0), (1003, 0)]);
}

#[test]
fn test_gate_latches_disabled() {
    init_tracing();
    FakeCredentials::reset_thread();
    FakeCredentials::set_caps(false, false);
    let config = GatewayConfig::default();
    let imp = Impersonator::new(
        Arc::new(FakeCredentials::new()),
        Arc::new(FakeDirectory::new().user("alice", 1001, 900, &[])),
        &config,
    );

    assert!(imp.ensure_capabilities().is_err());
    assert!(imp.gate().is_disabled());

    // Restoring the capabilities does not re-enable the gate
    FakeCredentials::set_caps(true, true);
    let err = imp
        .with_identity(&Principal::user("alice"), || ())
        .unwrap_err();
    assert!(matches!(err, IdentityError::Capabilities(_)));
}
