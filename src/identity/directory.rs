//! passwd/group lookups.

use nix::unistd::User;
use std::ffi::CString;
use std::io;

/// Initial `getgrouplist` buffer size.
const INITIAL_NGROUPS: usize = 16;

/// Account entry from the user database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserEntry {
    pub uid: u32,
    pub gid: u32,
}

/// User and group database.
pub trait UserDirectory: Send + Sync {
    /// Look up a username. `Ok(None)` means the user does not exist.
    fn lookup_user(&self, username: &str) -> io::Result<Option<UserEntry>>;

    /// All groups `username` belongs to, including `primary_gid`.
    fn supplementary_groups(&self, username: &str, primary_gid: u32) -> io::Result<Vec<u32>>;
}

/// [`UserDirectory`] backed by the host's NSS configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDirectory;

impl SystemDirectory {
    pub fn new() -> Self {
        Self
    }
}

impl UserDirectory for SystemDirectory {
    fn lookup_user(&self, username: &str) -> io::Result<Option<UserEntry>> {
        // nix grows the getpwnam_r buffer on ERANGE
        let user = User::from_name(username).map_err(io::Error::from)?;
        Ok(user.map(|u| UserEntry {
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
        }))
    }

    fn supplementary_groups(&self, username: &str, primary_gid: u32) -> io::Result<Vec<u32>> {
        let name =
            CString::new(username).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;

        let mut groups: Vec<libc::gid_t> = vec![0; INITIAL_NGROUPS];
        let mut ngroups = groups.len() as libc::c_int;

        // On a short buffer getgrouplist returns -1 and stores the needed size
        // in ngroups. Resize once; a second short read means the membership
        // changed underneath us.
        for attempt in 0..2 {
            let ret = unsafe {
                libc::getgrouplist(
                    name.as_ptr(),
                    primary_gid as libc::gid_t,
                    groups.as_mut_ptr(),
                    &mut ngroups,
                )
            };
            if ret != -1 {
                groups.truncate(ngroups.max(0) as usize);
                return Ok(groups.into_iter().map(|g| g as u32).collect());
            }
            if attempt == 0 && ngroups as usize > groups.len() {
                tracing::debug!(target: "identity", user = username, ngroups, "resizing group buffer");
                groups.resize(ngroups as usize, 0);
                continue;
            }
            break;
        }

        tracing::warn!(target: "identity", user = username, "failure looking up supplementary groups");
        Err(io::Error::from_raw_os_error(libc::EIO))
    }
}
