//! Per-thread filesystem credentials.
//!
//! This module provides:
//!
//! - `ThreadCredentials`: the seam over the kernel's per-thread identity calls
//! - `KernelCredentials`: the Linux implementation (setfsuid/setfsgid, raw setgroups)
//! - `CapabilityGate`: CAP_SETUID/CAP_SETGID verification for the calling thread
//! - `IdentityGuard`: RAII impersonation of a user for one filesystem operation
//! - `RootOverrideGuard`: RAII switch back to fsuid 0 for probing
//!
//! Uses setfsuid()/setfsgid() syscalls which control which user/group is used
//! for filesystem access checks. These are per-thread and don't affect other
//! credentials (euid/egid remain unchanged). Supplementary groups are set with
//! the raw `setgroups` syscall rather than the libc wrapper, since glibc
//! broadcasts the change to every thread in the process (see nptl(7)).

pub mod caps;
mod guard;
mod root;

pub use self::caps::{CapabilityError, CapabilityGate, CapabilityState};
pub use guard::{ActiveIdentityState, IdentityGuard};
pub use root::RootOverrideGuard;

use ::caps::{CapSet, Capability};
use std::io;

/// Passing -1 to setfsuid/setfsgid leaves the value unchanged and returns the current one.
const QUERY_ID: u32 = u32::MAX;

/// Kernel operations acting on the calling thread's identity.
///
/// Every method affects the calling thread only. Implementations must not
/// touch the credentials of other threads.
pub trait ThreadCredentials: Send + Sync {
    /// Current filesystem uid of the calling thread.
    fn fsuid(&self) -> u32;

    /// Current filesystem gid of the calling thread.
    fn fsgid(&self) -> u32;

    /// Switch the filesystem uid, returning the previous value.
    ///
    /// Returns `EPERM` if the switch did not take effect.
    fn set_fsuid(&self, uid: u32) -> io::Result<u32>;

    /// Switch the filesystem gid, returning the previous value.
    fn set_fsgid(&self, gid: u32) -> io::Result<u32>;

    /// Replace the calling thread's supplementary groups.
    fn set_groups(&self, groups: &[u32]) -> io::Result<()>;

    /// Check whether `cap` is present in `set` for the calling thread.
    fn has_capability(&self, set: CapSet, cap: Capability) -> io::Result<bool>;

    /// Raise `cap` into the calling thread's effective set.
    fn raise_capability(&self, cap: Capability) -> io::Result<()>;
}

/// Linux implementation of [`ThreadCredentials`].
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelCredentials;

impl KernelCredentials {
    pub fn new() -> Self {
        Self
    }
}

impl ThreadCredentials for KernelCredentials {
    fn fsuid(&self) -> u32 {
        unsafe { libc::setfsuid(QUERY_ID) as u32 }
    }

    fn fsgid(&self) -> u32 {
        unsafe { libc::setfsgid(QUERY_ID) as u32 }
    }

    fn set_fsuid(&self, uid: u32) -> io::Result<u32> {
        // setfsuid returns the previous fsuid, not an error code
        let prev = unsafe { libc::setfsuid(uid) } as u32;
        // Verify the change took effect by reading back
        if self.fsuid() != uid {
            unsafe { libc::setfsuid(prev) };
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        Ok(prev)
    }

    fn set_fsgid(&self, gid: u32) -> io::Result<u32> {
        let prev = unsafe { libc::setfsgid(gid) } as u32;
        if self.fsgid() != gid {
            unsafe { libc::setfsgid(prev) };
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        Ok(prev)
    }

    fn set_groups(&self, groups: &[u32]) -> io::Result<()> {
        let list: Vec<libc::gid_t> = groups.iter().map(|&g| g as libc::gid_t).collect();
        let ret = unsafe { libc::syscall(libc::SYS_setgroups, list.len(), list.as_ptr()) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn has_capability(&self, set: CapSet, cap: Capability) -> io::Result<bool> {
        ::caps::has_cap(None, set, cap).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn raise_capability(&self, cap: Capability) -> io::Result<()> {
        ::caps::raise(None, CapSet::Effective, cap)
            .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e))
    }
}
