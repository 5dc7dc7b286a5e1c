//! Supplementary group resolution.
//!
//! The filesystem uid/gid model allows a single active group per thread,
//! while POSIX lets any of a user's groups satisfy a group permission check.
//! After an operation fails with `EACCES` under the user's primary gid, the
//! resolver finds the one group that could have granted it, so the caller
//! can retry with that group active.
//!
//! # Algorithm
//!
//! 1. Stat the target path as root (under a [`RootOverrideGuard`]).
//! 2. If it does not exist, walk up to the nearest existing ancestor: for a
//!    node being created, its parent's mode and group decide.
//! 3. Look up every group the user belongs to.
//! 4. If the stat'd node's group is among them, that is the answer.
//!
//! Only the first existing node is tested. If its group does not match, the
//! search stops there even if a shallower ancestor's group would match.
//! This bounds a resolution to one stat per path component and one group
//! comparison.

use crate::backend::{FileStat, StorageBackend};
use crate::credentials::{RootOverrideGuard, ThreadCredentials};
use crate::identity::UserDirectory;

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no group of the user owns {path} (group {gid})")]
    NoMatch { path: PathBuf, gid: u32 },

    #[error("no existing ancestor for {0}")]
    InvalidPath(PathBuf),

    #[error("stat of {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to switch fsuid to root for probing: {0}")]
    Override(#[source] io::Error),

    #[error("failure looking up supplementary groups for {user}: {source}")]
    GroupLookup {
        user: String,
        #[source]
        source: io::Error,
    },
}

impl ResolveError {
    /// Errno reported for the pending filesystem operation.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoMatch { .. } | Self::Override(_) => libc::EACCES,
            Self::InvalidPath(_) => libc::EINVAL,
            Self::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Self::GroupLookup { .. } => libc::EIO,
        }
    }

    /// Short error class: `no-match`, `invalid-path` or `io-error`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoMatch { .. } | Self::Override(_) => "no-match",
            Self::InvalidPath(_) => "invalid-path",
            Self::Io { .. } | Self::GroupLookup { .. } => "io-error",
        }
    }
}

/// A group that would have granted access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Group to make active on retry.
    pub gid: u32,
    /// The governing node has the set-group-id bit: new children inherit its
    /// group, so the caller should not reset a created node's group.
    pub sticky_gid: bool,
    /// The existing node whose group was tested.
    pub governing: PathBuf,
    /// Parent hops taken to reach `governing`.
    pub steps: usize,
}

fn trim_trailing_slashes(path: &[u8]) -> Option<&[u8]> {
    let end = path.iter().rposition(|&b| b != b'/')?;
    Some(&path[..=end])
}

/// Parent of `path`: strip trailing separators, then the final segment.
///
/// Returns `None` when no parent can be computed: the root itself, an empty
/// path, or a relative path with a single segment.
///
/// ```
/// use multiuser::resolver::parent_dir;
/// use std::path::Path;
///
/// assert_eq!(parent_dir(Path::new("/data/exp1/")).unwrap(), Path::new("/data"));
/// assert_eq!(parent_dir(Path::new("/data")).unwrap(), Path::new("/"));
/// assert!(parent_dir(Path::new("/")).is_none());
/// ```
pub fn parent_dir(path: &Path) -> Option<PathBuf> {
    let trimmed = trim_trailing_slashes(path.as_os_str().as_bytes())?;
    let last_slash = trimmed.iter().rposition(|&b| b == b'/')?;
    let parent = match trim_trailing_slashes(&trimmed[..last_slash]) {
        Some(parent) => PathBuf::from(OsStr::from_bytes(parent)),
        None => PathBuf::from("/"),
    };
    Some(parent)
}

/// `path` followed by each of its parents, up to the root.
///
/// Every item is strictly shorter than the previous one, so the sequence
/// has at most one item per path component plus the path itself.
#[derive(Debug, Clone)]
pub struct Ancestors {
    next: Option<PathBuf>,
}

impl Iterator for Ancestors {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        let current = self.next.take()?;
        self.next = parent_dir(&current);
        Some(current)
    }
}

pub fn ancestors(path: &Path) -> Ancestors {
    Ancestors {
        next: Some(path.to_path_buf()),
    }
}

/// Finds the supplementary group that grants access to a path.
pub struct SupplementalGroupResolver<'a> {
    backend: &'a dyn StorageBackend,
    directory: &'a dyn UserDirectory,
    creds: &'a dyn ThreadCredentials,
}

impl<'a> SupplementalGroupResolver<'a> {
    pub fn new(
        backend: &'a dyn StorageBackend,
        directory: &'a dyn UserDirectory,
        creds: &'a dyn ThreadCredentials,
    ) -> Self {
        Self {
            backend,
            directory,
            creds,
        }
    }

    /// Determine which of `username`'s groups owns the node governing `path`.
    pub fn resolve(
        &self,
        username: &str,
        primary_gid: u32,
        path: &Path,
    ) -> Result<Resolution, ResolveError> {
        let (governing, stat, steps) = self.nearest_existing(path)?;
        let sticky_gid = stat.is_setgid();

        let groups = self
            .directory
            .supplementary_groups(username, primary_gid)
            .map_err(|source| ResolveError::GroupLookup {
                user: username.to_string(),
                source,
            })?;

        if groups.contains(&stat.gid) {
            tracing::debug!(
                target: "resolver",
                user = username,
                path = %path.display(),
                governing = %governing.display(),
                gid = stat.gid,
                sticky_gid,
                "supplementary group grants access"
            );
            return Ok(Resolution {
                gid: stat.gid,
                sticky_gid,
                governing,
                steps,
            });
        }

        tracing::debug!(
            target: "resolver",
            user = username,
            governing = %governing.display(),
            gid = stat.gid,
            "no supplementary group matches"
        );
        Err(ResolveError::NoMatch {
            path: governing,
            gid: stat.gid,
        })
    }

    /// Stat `path` or its nearest existing ancestor as root.
    fn nearest_existing(&self, path: &Path) -> Result<(PathBuf, FileStat, usize), ResolveError> {
        let _root = RootOverrideGuard::new(self.creds).map_err(ResolveError::Override)?;

        for (steps, candidate) in ancestors(path).enumerate() {
            match self.backend.stat(&candidate) {
                Ok(stat) => return Ok((candidate, stat, steps)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::trace!(target: "resolver", path = %candidate.display(), "not found, trying parent");
                }
                Err(source) => {
                    return Err(ResolveError::Io {
                        path: candidate,
                        source,
                    })
                }
            }
        }

        Err(ResolveError::InvalidPath(path.to_path_buf()))
    }
}
