//! Scoped impersonation entry points.
//!
//! `Impersonator` ties together the kernel seam, the capability gate, the
//! user directory and the minimum-id policy:
//!
//! - `with_identity`: run a closure as a principal, restoring afterwards
//! - `with_root_override`: run a lookup with fsuid 0
//! - `resolve_supplementary_group`: find the group that would grant access

use crate::backend::StorageBackend;
use crate::config::GatewayConfig;
use crate::credentials::{
    CapabilityError, CapabilityGate, IdentityGuard, KernelCredentials, RootOverrideGuard,
    ThreadCredentials,
};
use crate::identity::{Identity, IdentityError, Principal, SystemDirectory, UserDirectory};
use crate::resolver::{Resolution, ResolveError, SupplementalGroupResolver};

use std::io;
use std::path::Path;
use std::sync::Arc;

pub struct Impersonator {
    creds: Arc<dyn ThreadCredentials>,
    directory: Arc<dyn UserDirectory>,
    gate: CapabilityGate,
    min_uid: u32,
    min_gid: u32,
}

impl Impersonator {
    pub fn new(
        creds: Arc<dyn ThreadCredentials>,
        directory: Arc<dyn UserDirectory>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            creds,
            directory,
            gate: CapabilityGate::new(),
            min_uid: config.min_uid,
            min_gid: config.min_gid,
        }
    }

    /// Impersonator using the kernel and the host's user database.
    pub fn system(config: &GatewayConfig) -> Self {
        Self::new(
            Arc::new(KernelCredentials::new()),
            Arc::new(SystemDirectory::new()),
            config,
        )
    }

    pub fn credentials(&self) -> &dyn ThreadCredentials {
        self.creds.as_ref()
    }

    pub fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    pub fn gate(&self) -> &CapabilityGate {
        &self.gate
    }

    /// Run the capability gate on the calling thread.
    pub fn ensure_capabilities(&self) -> Result<(), CapabilityError> {
        self.gate.ensure(self.creds.as_ref())
    }

    /// Look up `username` under the minimum-id policy.
    pub fn identity(&self, username: &str) -> Result<Identity, IdentityError> {
        Identity::resolve(self.directory.as_ref(), username, self.min_uid, self.min_gid)
    }

    /// Open an identity scope for `principal` on the calling thread.
    pub fn enter(&self, principal: &Principal) -> Result<IdentityGuard<'_>, IdentityError> {
        match principal {
            Principal::Anonymous => IdentityGuard::anonymous(self.creds.as_ref()),
            Principal::User(name) => {
                let identity = self.identity(name)?;
                tracing::debug!(target: "impersonate", user = %name, "switching fs uid for user");
                self.enter_identity(&identity)
            }
        }
    }

    /// Open an identity scope for an already resolved identity.
    pub fn enter_identity(&self, identity: &Identity) -> Result<IdentityGuard<'_>, IdentityError> {
        IdentityGuard::new(self.creds.as_ref(), &self.gate, identity)
    }

    /// Run `f` as `principal`. Credentials are restored when `f` returns or
    /// unwinds.
    pub fn with_identity<T>(
        &self,
        principal: &Principal,
        f: impl FnOnce() -> T,
    ) -> Result<T, IdentityError> {
        let _guard = self.enter(principal)?;
        Ok(f())
    }

    /// Run `f` with fsuid 0. Internal lookups only.
    pub fn with_root_override<T>(&self, f: impl FnOnce() -> T) -> io::Result<T> {
        let _guard = RootOverrideGuard::new(self.creds.as_ref())?;
        Ok(f())
    }

    /// Find which of `username`'s groups owns the node governing `path`.
    pub fn resolve_supplementary_group(
        &self,
        backend: &dyn StorageBackend,
        username: &str,
        primary_gid: u32,
        path: &Path,
    ) -> Result<Resolution, ResolveError> {
        SupplementalGroupResolver::new(backend, self.directory.as_ref(), self.creds.as_ref())
            .resolve(username, primary_gid, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeCredentials, FakeDirectory};

    fn impersonator() -> Impersonator {
        let directory = FakeDirectory::new()
            .user("alice", 1001, 900, &[700, 800])
            .user("sys", 10, 10, &[]);
        Impersonator::new(
            Arc::new(FakeCredentials::new()),
            Arc::new(directory),
            &GatewayConfig::default(),
        )
    }

    #[test]
    fn test_with_identity_restores() {
        FakeCredentials::reset_thread();
        let imp = impersonator();

        let seen = imp
            .with_identity(&Principal::user("alice"), || FakeCredentials::current())
            .unwrap();
        assert_eq!(seen, (1001, 900, vec![900, 700, 800]));
        assert_eq!(FakeCredentials::current(), (0, 0, vec![]));
    }

    #[test]
    fn test_with_identity_idempotent() {
        FakeCredentials::reset_thread();
        let imp = impersonator();
        let alice = Principal::user("alice");

        let first = imp.with_identity(&alice, FakeCredentials::current).unwrap();
        let second = imp.with_identity(&alice, FakeCredentials::current).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_error_inside_scope_restores() {
        FakeCredentials::reset_thread();
        let imp = impersonator();

        let backend = FakeBackend::new()
            .dir("/", 0, 0, 0o755)
            .dir("/data", 0, 0, 0o755)
            .file("/data/locked", 0, 0, 0o644);

        let result = imp
            .with_identity(&Principal::user("alice"), || {
                backend.write(Path::new("/data/locked"), 0, b"x")
            })
            .unwrap();
        assert_eq!(result.unwrap_err().raw_os_error(), Some(libc::EACCES));
        assert_eq!(backend.seen_identities(), vec![(1001, 900)]);
        assert_eq!(FakeCredentials::current(), (0, 0, vec![]));
    }

    #[test]
    fn test_root_override_inside_identity_scope() {
        FakeCredentials::reset_thread();
        let imp = impersonator();

        let inside = imp
            .with_identity(&Principal::user("alice"), || {
                let as_root = imp.with_root_override(FakeCredentials::current).unwrap();
                (as_root, FakeCredentials::current())
            })
            .unwrap();
        assert_eq!(inside.0 .0, 0);
        assert_eq!(inside.0 .1, 900);
        assert_eq!(inside.1, (1001, 900, vec![900, 700, 800]));
    }

    #[test]
    fn test_gate_failure_never_switches() {
        FakeCredentials::reset_thread();
        FakeCredentials::set_caps(false, false);
        let imp = impersonator();

        let err = imp
            .with_identity(&Principal::user("alice"), || ())
            .unwrap_err();
        assert!(matches!(err, IdentityError::Capabilities(_)));
        assert_eq!(err.errno(), libc::EACCES);
        assert!(imp.gate().is_disabled());
        assert!(FakeCredentials::calls().is_empty());
    }

    #[test]
    fn test_resolve_supplementary_group() {
        FakeCredentials::reset_thread();
        let imp = impersonator();
        let backend = FakeBackend::new()
            .dir("/", 0, 0, 0o755)
            .dir("/data", 0, 0, 0o755)
            .dir("/data/exp1", 0, 800, 0o2770);

        let res = imp
            .resolve_supplementary_group(&backend, "alice", 900, Path::new("/data/exp1/new"))
            .unwrap();
        assert_eq!(res.gid, 800);
        assert!(res.sticky_gid);
    }

    #[test]
    fn test_system_user_never_switches() {
        FakeCredentials::reset_thread();
        let imp = impersonator();

        let err = imp
            .with_identity(&Principal::user("sys"), || ())
            .unwrap_err();
        assert!(matches!(err, IdentityError::SystemUid { .. }));
        assert!(FakeCredentials::calls().is_empty());
    }

    #[test]
    fn test_anonymous_runs_as_daemon() {
        FakeCredentials::reset_thread();
        let imp = impersonator();
        let seen = imp
            .with_identity(&Principal::Anonymous, FakeCredentials::current)
            .unwrap();
        assert_eq!(seen.0, 0);
        assert!(FakeCredentials::calls().is_empty());
    }
}
