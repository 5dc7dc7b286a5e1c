//! User identities and their lookup.
//!
//! - `Identity`: uid, primary gid and supplementary groups of one principal
//! - `Principal`: who a request claims to be, extracted from the client entity
//! - `UserDirectory`: passwd/group lookups (`SystemDirectory` uses the host's NSS)

mod directory;
mod principal;

pub use directory::{SystemDirectory, UserDirectory, UserEntry};
pub use principal::{ClientEntity, Principal, RequestEnv};

use crate::credentials::CapabilityError;
use std::io;

/// Reasons an identity scope could not be opened.
///
/// Every variant denies the pending operation; none is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no security entity provided")]
    NoPrincipal,

    #[error("request mapped to username that does not exist: {0}")]
    UnknownUser(String),

    #[error("failure looking up {user}: {source}")]
    Lookup {
        user: String,
        #[source]
        source: io::Error,
    },

    #[error("username {user} maps to a system UID {uid}")]
    SystemUid { user: String, uid: u32 },

    #[error("username {user} maps to a system GID {gid}")]
    SystemGid { user: String, gid: u32 },

    #[error("capability check failed: {0}")]
    Capabilities(#[from] CapabilityError),

    #[error("failed to switch fs credentials: {0}")]
    Switch(#[source] io::Error),

    #[error("an identity is already active on this thread")]
    Nested,

    #[error("thread credentials could not be restored earlier; refusing to impersonate")]
    ThreadPoisoned,
}

impl IdentityError {
    /// Errno reported for the pending filesystem operation.
    pub fn errno(&self) -> i32 {
        libc::EACCES
    }
}

/// A resolved POSIX principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups, including the primary gid as `getgrouplist` reports it.
    pub groups: Vec<u32>,
}

impl Identity {
    pub fn new(uid: u32, gid: u32, groups: Vec<u32>) -> Self {
        Self { uid, gid, groups }
    }

    /// Look up `username` and apply the minimum uid/gid policy.
    ///
    /// Accounts below `min_uid`/`min_gid` are system or service accounts and
    /// are never impersonated.
    pub fn resolve(
        directory: &dyn UserDirectory,
        username: &str,
        min_uid: u32,
        min_gid: u32,
    ) -> Result<Self, IdentityError> {
        let entry = match directory.lookup_user(username) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::warn!(target: "identity", user = username, "username does not exist");
                return Err(IdentityError::UnknownUser(username.to_string()));
            }
            Err(source) => {
                tracing::warn!(target: "identity", user = username, error = ?source, "failure looking up uid");
                return Err(IdentityError::Lookup {
                    user: username.to_string(),
                    source,
                });
            }
        };

        if entry.uid < min_uid {
            tracing::warn!(target: "identity", user = username, uid = entry.uid, "maps to a system UID; rejecting");
            return Err(IdentityError::SystemUid {
                user: username.to_string(),
                uid: entry.uid,
            });
        }
        if entry.gid < min_gid {
            tracing::warn!(target: "identity", user = username, gid = entry.gid, "maps to a system GID; rejecting");
            return Err(IdentityError::SystemGid {
                user: username.to_string(),
                gid: entry.gid,
            });
        }

        let groups = directory
            .supplementary_groups(username, entry.gid)
            .map_err(|source| IdentityError::Lookup {
                user: username.to_string(),
                source,
            })?;

        Ok(Self::new(entry.uid, entry.gid, groups))
    }

    /// Same principal with `gid` as the active filesystem group.
    pub fn with_active_gid(&self, gid: u32) -> Self {
        Self {
            uid: self.uid,
            gid,
            groups: self.groups.clone(),
        }
    }

    pub fn is_member(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}
