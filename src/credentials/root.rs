//! Temporary fsuid 0 for probing operations.
//!
//! Shared filesystems such as NFS and CephFS ignore CAP_DAC_READ_SEARCH and go
//! solely by the fs uid/gid, so probing a directory the impersonated user
//! cannot read requires switching the fsuid itself back to root.

use super::guard::mark_poisoned;
use super::ThreadCredentials;
use std::io;
use std::marker::PhantomData;

/// Guard that switches the filesystem uid to 0 and restores it on drop.
///
/// Only the fsuid changes; fsgid and supplementary groups stay as they are.
/// Meant for internal read-only lookups (stat), never for request handling.
#[must_use = "the previous fsuid is restored as soon as the guard is dropped"]
pub struct RootOverrideGuard<'a> {
    creds: &'a dyn ThreadCredentials,
    original_fsuid: u32,
    _thread: PhantomData<*const ()>,
}

impl<'a> RootOverrideGuard<'a> {
    /// Switch the calling thread's fsuid to 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the switch fails.
    pub fn new(creds: &'a dyn ThreadCredentials) -> io::Result<Self> {
        let original_fsuid = creds.set_fsuid(0).map_err(|e| {
            tracing::warn!(target: "credentials", error = ?e, "failed to switch fsuid to root");
            e
        })?;
        tracing::trace!(target: "credentials", original_fsuid, "root override");
        Ok(Self {
            creds,
            original_fsuid,
            _thread: PhantomData,
        })
    }

    pub fn original_fsuid(&self) -> u32 {
        self.original_fsuid
    }
}

impl std::fmt::Debug for RootOverrideGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootOverrideGuard")
            .field("original_fsuid", &self.original_fsuid)
            .finish_non_exhaustive()
    }
}

impl Drop for RootOverrideGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.creds.set_fsuid(self.original_fsuid) {
            tracing::error!(
                target: "credentials",
                uid = self.original_fsuid,
                error = ?e,
                "failed to return fsuid to original state"
            );
            mark_poisoned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CapabilityGate, IdentityGuard};
    use crate::identity::Identity;
    use crate::testing::FakeCredentials;

    #[test]
    fn test_override_inside_identity() {
        let creds = FakeCredentials::new();
        FakeCredentials::reset_thread();
        let gate = CapabilityGate::new();
        let bob = Identity::new(1002, 1002, vec![1002, 700]);

        let _identity = IdentityGuard::new(&creds, &gate, &bob).unwrap();
        {
            let root = RootOverrideGuard::new(&creds).unwrap();
            assert_eq!(root.original_fsuid(), 1002);
            assert_eq!(creds.fsuid(), 0);
            // gid and groups untouched
            assert_eq!(creds.fsgid(), 1002);
            assert_eq!(FakeCredentials::groups(), vec![1002, 700]);
        }
        assert_eq!(creds.fsuid(), 1002);
    }

    #[test]
    fn test_override_failure() {
        let creds = FakeCredentials::new();
        FakeCredentials::reset_thread();
        FakeCredentials::fail_fsuid(0);

        assert!(RootOverrideGuard::new(&creds).is_err());
        assert!(!IdentityGuard::is_poisoned());
    }
}
