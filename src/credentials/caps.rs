//! CAP_SETUID/CAP_SETGID verification.
//!
//! Effective capabilities are a per-thread attribute and are not guaranteed to
//! propagate to threads created later, so the gate is re-run on every thread
//! before its first identity switch.

use super::ThreadCredentials;
use ::caps::{CapSet, Capability};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Capabilities needed to change filesystem uid and gid.
const REQUIRED: [Capability; 2] = [Capability::CAP_SETUID, Capability::CAP_SETGID];

/// Capability gate errors.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("{0} not in the daemon's permitted set")]
    NotPermitted(Capability),

    #[error("identity switching disabled: required capabilities are not permitted")]
    Disabled,

    #[error("failed to query thread capabilities: {0}")]
    Query(#[source] io::Error),

    #[error("failed to raise {cap} into the effective set: {source}")]
    Raise {
        cap: Capability,
        #[source]
        source: io::Error,
    },
}

impl CapabilityError {
    /// Errno reported for the pending filesystem operation.
    pub fn errno(&self) -> i32 {
        libc::EACCES
    }

    /// Whether retrying on another thread could succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotPermitted(_) | Self::Disabled)
    }
}

/// Snapshot of the calling thread's identity-change capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityState {
    pub setuid_permitted: bool,
    pub setgid_permitted: bool,
    pub setuid_effective: bool,
    pub setgid_effective: bool,
}

impl CapabilityState {
    /// Both capabilities are effective; identity switches can proceed.
    pub fn can_switch(&self) -> bool {
        self.setuid_effective && self.setgid_effective
    }

    /// Both capabilities can at least be raised.
    pub fn is_permitted(&self) -> bool {
        self.setuid_permitted && self.setgid_permitted
    }
}

/// Gate that must pass before any identity switch on a thread.
///
/// Once a thread reports the capabilities missing from its permitted set,
/// the gate latches closed for every thread: the permitted set can only
/// shrink, so no later attempt can succeed.
#[derive(Debug, Default)]
pub struct CapabilityGate {
    disabled: AtomicBool,
}

impl CapabilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a permitted-set check has failed.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Inspect the calling thread without changing anything.
    pub fn inspect(creds: &dyn ThreadCredentials) -> Result<CapabilityState, CapabilityError> {
        let has = |set, cap| creds.has_capability(set, cap).map_err(CapabilityError::Query);
        Ok(CapabilityState {
            setuid_permitted: has(CapSet::Permitted, Capability::CAP_SETUID)?,
            setgid_permitted: has(CapSet::Permitted, Capability::CAP_SETGID)?,
            setuid_effective: has(CapSet::Effective, Capability::CAP_SETUID)?,
            setgid_effective: has(CapSet::Effective, Capability::CAP_SETGID)?,
        })
    }

    /// Make CAP_SETUID and CAP_SETGID effective on the calling thread.
    ///
    /// Fails if either is missing from the permitted set. Only the calling
    /// thread's effective set is modified.
    pub fn ensure(&self, creds: &dyn ThreadCredentials) -> Result<(), CapabilityError> {
        if self.is_disabled() {
            return Err(CapabilityError::Disabled);
        }

        for cap in REQUIRED {
            let permitted = creds
                .has_capability(CapSet::Permitted, cap)
                .map_err(CapabilityError::Query)?;
            if !permitted {
                tracing::error!(target: "credentials", %cap, "capability not in permitted set");
                self.disabled.store(true, Ordering::Release);
                return Err(CapabilityError::NotPermitted(cap));
            }
        }

        for cap in REQUIRED {
            let effective = creds
                .has_capability(CapSet::Effective, cap)
                .map_err(CapabilityError::Query)?;
            if !effective {
                tracing::debug!(target: "credentials", %cap, "raising capability for thread");
                creds
                    .raise_capability(cap)
                    .map_err(|source| CapabilityError::Raise { cap, source })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCredentials;

    #[test]
    fn test_raises_permitted_caps() {
        let creds = FakeCredentials::new();
        FakeCredentials::reset_thread();
        FakeCredentials::set_caps(true, false);

        let gate = CapabilityGate::new();
        gate.ensure(&creds).unwrap();

        let state = CapabilityGate::inspect(&creds).unwrap();
        assert!(state.can_switch());
        assert!(!gate.is_disabled());
    }

    #[test]
    fn test_not_permitted_latches_gate() {
        let creds = FakeCredentials::new();
        FakeCredentials::reset_thread();
        FakeCredentials::set_caps(false, false);

        let gate = CapabilityGate::new();
        let err = gate.ensure(&creds).unwrap_err();
        assert!(matches!(err, CapabilityError::NotPermitted(Capability::CAP_SETUID)));
        assert!(err.is_fatal());
        assert!(gate.is_disabled());

        // Even a thread that has the capabilities is refused afterwards
        FakeCredentials::set_caps(true, true);
        assert!(matches!(gate.ensure(&creds), Err(CapabilityError::Disabled)));
    }

    #[test]
    fn test_inspect_reports_state() {
        let creds = FakeCredentials::new();
        FakeCredentials::reset_thread();
        FakeCredentials::set_caps(true, false);

        let state = CapabilityGate::inspect(&creds).unwrap();
        assert!(state.is_permitted());
        assert!(!state.can_switch());
    }
}
