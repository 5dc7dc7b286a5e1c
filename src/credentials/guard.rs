//! RAII impersonation of a user for the duration of one filesystem operation.

use super::{CapabilityGate, ThreadCredentials};
use crate::identity::{Identity, IdentityError};
use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    /// An `IdentityGuard` is open on this thread.
    static ACTIVE: Cell<bool> = const { Cell::new(false) };

    /// A restore failed on this thread; its fs credentials can't be trusted.
    static POISONED: Cell<bool> = const { Cell::new(false) };
}

pub(super) fn mark_poisoned() {
    POISONED.with(|p| p.set(true));
}

/// Saved state of an open identity scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActiveIdentityState {
    pub saved_uid: Option<u32>,
    pub saved_gid: Option<u32>,
    pub is_anonymous: bool,
}

/// Guard that switches filesystem uid/gid and supplementary groups to a
/// user's identity and restores them on drop.
///
/// The switch order is fsgid, then fsuid, then supplementary groups. Drop
/// restores fsuid, then fsgid, then clears the supplementary groups.
///
/// # Thread Safety
///
/// The guard is `!Send`: the credentials it switched belong to the thread
/// that created it, so it must be dropped on that thread. Only one guard may
/// be open per thread; a [`RootOverrideGuard`](super::RootOverrideGuard) may
/// be nested inside it for probing.
///
/// Supplementary groups are cleared rather than restored on drop, which
/// assumes the daemon's worker threads run without supplementary groups.
#[must_use = "credentials are restored as soon as the guard is dropped"]
pub struct IdentityGuard<'a> {
    creds: &'a dyn ThreadCredentials,
    state: ActiveIdentityState,
    _thread: PhantomData<*const ()>,
}

impl<'a> IdentityGuard<'a> {
    /// Switch the calling thread to `identity`.
    ///
    /// # Errors
    ///
    /// Fails without touching the thread's credentials if the thread is
    /// poisoned, already impersonating, or the capability gate refuses.
    /// Fails after undoing any partial switch if a kernel call fails.
    pub fn new(
        creds: &'a dyn ThreadCredentials,
        gate: &CapabilityGate,
        identity: &Identity,
    ) -> Result<Self, IdentityError> {
        Self::check_thread()?;
        gate.ensure(creds)?;

        // Switch fsgid first (must do this before dropping fsuid privileges)
        let prev_gid = creds.set_fsgid(identity.gid).map_err(|e| {
            tracing::error!(target: "credentials", gid = identity.gid, error = ?e, "setfsgid failed");
            IdentityError::Switch(e)
        })?;

        let prev_uid = match creds.set_fsuid(identity.uid) {
            Ok(prev) => prev,
            Err(e) => {
                tracing::error!(target: "credentials", uid = identity.uid, error = ?e, "setfsuid failed");
                Self::undo(creds, None, Some(prev_gid));
                return Err(IdentityError::Switch(e));
            }
        };

        if let Err(e) = creds.set_groups(&identity.groups) {
            tracing::error!(target: "credentials", uid = identity.uid, error = ?e, "setgroups failed");
            Self::undo(creds, Some(prev_uid), Some(prev_gid));
            return Err(IdentityError::Switch(e));
        }

        ACTIVE.with(|a| a.set(true));
        tracing::debug!(
            target: "credentials",
            uid = identity.uid,
            gid = identity.gid,
            ngroups = identity.groups.len(),
            "switched fs credentials"
        );

        Ok(Self {
            creds,
            state: ActiveIdentityState {
                saved_uid: Some(prev_uid),
                saved_gid: Some(prev_gid),
                is_anonymous: false,
            },
            _thread: PhantomData,
        })
    }

    /// Open a scope that runs as the daemon's own identity.
    pub fn anonymous(creds: &'a dyn ThreadCredentials) -> Result<Self, IdentityError> {
        Self::check_thread()?;
        ACTIVE.with(|a| a.set(true));
        Ok(Self {
            creds,
            state: ActiveIdentityState {
                saved_uid: None,
                saved_gid: None,
                is_anonymous: true,
            },
            _thread: PhantomData,
        })
    }

    pub fn state(&self) -> &ActiveIdentityState {
        &self.state
    }

    pub fn is_anonymous(&self) -> bool {
        self.state.is_anonymous
    }

    /// Whether an identity scope is open on the calling thread.
    pub fn is_active() -> bool {
        ACTIVE.with(|a| a.get())
    }

    /// Whether a failed restore has poisoned the calling thread.
    pub fn is_poisoned() -> bool {
        POISONED.with(|p| p.get())
    }

    fn check_thread() -> Result<(), IdentityError> {
        if Self::is_poisoned() {
            return Err(IdentityError::ThreadPoisoned);
        }
        if Self::is_active() {
            return Err(IdentityError::Nested);
        }
        Ok(())
    }

    /// Restore saved ids and clear groups. Returns false if anything failed.
    fn undo(creds: &dyn ThreadCredentials, uid: Option<u32>, gid: Option<u32>) -> bool {
        let mut restored = true;
        if let Some(uid) = uid {
            if let Err(e) = creds.set_fsuid(uid) {
                tracing::error!(target: "credentials", uid, error = ?e, "failed to return fsuid to original state");
                restored = false;
            }
        }
        if let Some(gid) = gid {
            if let Err(e) = creds.set_fsgid(gid) {
                tracing::error!(target: "credentials", gid, error = ?e, "failed to return fsgid to original state");
                restored = false;
            }
        }
        if let Err(e) = creds.set_groups(&[]) {
            tracing::error!(target: "credentials", error = ?e, "failed to clear supplementary groups");
            restored = false;
        }
        if !restored {
            mark_poisoned();
        }
        restored
    }
}

impl std::fmt::Debug for IdentityGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityGuard")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        if !self.state.is_anonymous
            && !Self::undo(self.creds, self.state.saved_uid, self.state.saved_gid)
        {
            tracing::error!(
                target: "credentials",
                "thread credentials left inconsistent; refusing further impersonation on this thread"
            );
        }
        ACTIVE.with(|a| a.set(false));
    }
}
