//! In-process stand-ins for the kernel, the user database and the backend.
//!
//! Switching real fs credentials needs CAP_SETUID/CAP_SETGID, so most tests
//! run against these instead:
//!
//! - `FakeCredentials`: per-thread fsuid/fsgid/groups/capabilities, with a
//!   log of every switch and failure injection
//! - `FakeDirectory`: map-backed users and group memberships
//! - `FakeBackend`: in-memory tree that checks permissions against the
//!   calling thread's `FakeCredentials` state
//!
//! `FakeBackend` grants group access by the fsgid alone, the way NFS and
//! CephFS servers see a single group. That is what makes the
//! supplementary-group retry necessary.

use crate::backend::{FileStat, StorageBackend};
use crate::credentials::ThreadCredentials;
use crate::identity::{UserDirectory, UserEntry};
use crate::resolver::{ancestors, parent_dir};

use ::caps::{CapSet, Capability};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct ThreadState {
    fsuid: u32,
    fsgid: u32,
    groups: Vec<u32>,
    permitted: bool,
    effective: bool,
    fail_fsuid: Option<u32>,
    fail_fsgid: Option<u32>,
    fail_groups: Option<Vec<u32>>,
    calls: Vec<String>,
}

impl Default for ThreadState {
    fn default() -> Self {
        Self {
            fsuid: 0,
            fsgid: 0,
            groups: Vec::new(),
            permitted: true,
            effective: true,
            fail_fsuid: None,
            fail_fsgid: None,
            fail_groups: None,
            calls: Vec::new(),
        }
    }
}

thread_local! {
    static THREAD: RefCell<ThreadState> = RefCell::new(ThreadState::default());
}

fn eperm<T>() -> io::Result<T> {
    Err(io::Error::from_raw_os_error(libc::EPERM))
}

/// Simulated per-thread credentials.
///
/// State lives in a thread local, so like the real calls every thread sees
/// only its own ids. A fresh thread starts as root with both capabilities
/// permitted and effective.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeCredentials;

impl FakeCredentials {
    pub fn new() -> Self {
        Self
    }

    /// Reset the calling thread to root with full capabilities.
    pub fn reset_thread() {
        THREAD.with(|t| *t.borrow_mut() = ThreadState::default());
    }

    pub fn set_caps(permitted: bool, effective: bool) {
        THREAD.with(|t| {
            let mut t = t.borrow_mut();
            t.permitted = permitted;
            t.effective = effective;
        });
    }

    /// Set fs ids directly, bypassing checks and the call log.
    pub fn set_fs_ids(uid: u32, gid: u32) {
        THREAD.with(|t| {
            let mut t = t.borrow_mut();
            t.fsuid = uid;
            t.fsgid = gid;
        });
    }

    /// Make every `set_fsuid(uid)` on this thread fail with `EPERM`.
    pub fn fail_fsuid(uid: u32) {
        THREAD.with(|t| t.borrow_mut().fail_fsuid = Some(uid));
    }

    /// Make every `set_fsgid(gid)` on this thread fail with `EPERM`.
    pub fn fail_fsgid(gid: u32) {
        THREAD.with(|t| t.borrow_mut().fail_fsgid = Some(gid));
    }

    /// Make `set_groups` with exactly `groups` fail with `EPERM`.
    pub fn fail_groups(groups: &[u32]) {
        THREAD.with(|t| t.borrow_mut().fail_groups = Some(groups.to_vec()));
    }

    pub fn groups() -> Vec<u32> {
        THREAD.with(|t| t.borrow().groups.clone())
    }

    /// Identity switch calls made on this thread, e.g. `"setfsuid(1001)"`.
    pub fn calls() -> Vec<String> {
        THREAD.with(|t| t.borrow().calls.clone())
    }

    /// (fsuid, fsgid, groups) of the calling thread.
    pub fn current() -> (u32, u32, Vec<u32>) {
        THREAD.with(|t| {
            let t = t.borrow();
            (t.fsuid, t.fsgid, t.groups.clone())
        })
    }
}

impl ThreadCredentials for FakeCredentials {
    fn fsuid(&self) -> u32 {
        THREAD.with(|t| t.borrow().fsuid)
    }

    fn fsgid(&self) -> u32 {
        THREAD.with(|t| t.borrow().fsgid)
    }

    fn set_fsuid(&self, uid: u32) -> io::Result<u32> {
        THREAD.with(|t| {
            let mut t = t.borrow_mut();
            t.calls.push(format!("setfsuid({uid})"));
            if t.fail_fsuid == Some(uid) || (!t.effective && uid != t.fsuid) {
                return eperm();
            }
            Ok(std::mem::replace(&mut t.fsuid, uid))
        })
    }

    fn set_fsgid(&self, gid: u32) -> io::Result<u32> {
        THREAD.with(|t| {
            let mut t = t.borrow_mut();
            t.calls.push(format!("setfsgid({gid})"));
            if t.fail_fsgid == Some(gid) || (!t.effective && gid != t.fsgid) {
                return eperm();
            }
            Ok(std::mem::replace(&mut t.fsgid, gid))
        })
    }

    fn set_groups(&self, groups: &[u32]) -> io::Result<()> {
        THREAD.with(|t| {
            let mut t = t.borrow_mut();
            t.calls.push(format!("setgroups({groups:?})"));
            if !t.effective || t.fail_groups.as_deref() == Some(groups) {
                return eperm();
            }
            t.groups = groups.to_vec();
            Ok(())
        })
    }

    fn has_capability(&self, set: CapSet, cap: Capability) -> io::Result<bool> {
        if !matches!(cap, Capability::CAP_SETUID | Capability::CAP_SETGID) {
            return Ok(false);
        }
        THREAD.with(|t| {
            let t = t.borrow();
            Ok(match set {
                CapSet::Permitted => t.permitted,
                CapSet::Effective => t.effective,
                _ => false,
            })
        })
    }

    fn raise_capability(&self, _cap: Capability) -> io::Result<()> {
        THREAD.with(|t| {
            let mut t = t.borrow_mut();
            if !t.permitted {
                return eperm();
            }
            t.effective = true;
            Ok(())
        })
    }
}

/// Map-backed [`UserDirectory`].
#[derive(Debug, Default, Clone)]
pub struct FakeDirectory {
    users: HashMap<String, (UserEntry, Vec<u32>)>,
    lookups: std::sync::Arc<Mutex<usize>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user. Group membership reports the primary gid first, then
    /// `extra_groups`, as `getgrouplist` does.
    pub fn user(mut self, name: &str, uid: u32, gid: u32, extra_groups: &[u32]) -> Self {
        let mut groups = vec![gid];
        groups.extend(extra_groups.iter().copied().filter(|&g| g != gid));
        self.users
            .insert(name.to_string(), (UserEntry { uid, gid }, groups));
        self
    }

    /// Number of `supplementary_groups` calls served.
    pub fn group_lookups(&self) -> usize {
        self.lookups.lock().map(|n| *n).unwrap_or(0)
    }
}

impl UserDirectory for FakeDirectory {
    fn lookup_user(&self, username: &str) -> io::Result<Option<UserEntry>> {
        Ok(self.users.get(username).map(|(entry, _)| *entry))
    }

    fn supplementary_groups(&self, username: &str, primary_gid: u32) -> io::Result<Vec<u32>> {
        if let Ok(mut n) = self.lookups.lock() {
            *n += 1;
        }
        let mut groups = vec![primary_gid];
        if let Some((_, member_of)) = self.users.get(username) {
            groups.extend(member_of.iter().copied().filter(|&g| g != primary_gid));
        }
        Ok(groups)
    }
}

const R: u32 = 4;
const W: u32 = 2;
const X: u32 = 1;

#[derive(Debug, Clone)]
struct Node {
    stat: FileStat,
    data: Vec<u8>,
}

/// In-memory [`StorageBackend`] that enforces mode bits against the calling
/// thread's [`FakeCredentials`].
#[derive(Debug, Default)]
pub struct FakeBackend {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
    stat_failures: HashMap<PathBuf, i32>,
    stat_log: Mutex<Vec<String>>,
    /// (fsuid, fsgid) seen by each mutating call.
    seen: Mutex<Vec<(u32, u32)>>,
}

fn errno<T>(code: i32) -> io::Result<T> {
    Err(io::Error::from_raw_os_error(code))
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(self, path: &str, uid: u32, gid: u32, mode: u32) -> Self {
        self.insert(path, libc::S_IFDIR | mode, uid, gid)
    }

    pub fn file(self, path: &str, uid: u32, gid: u32, mode: u32) -> Self {
        self.insert(path, libc::S_IFREG | mode, uid, gid)
    }

    /// Make `stat(path)` fail with `code`.
    pub fn fail_stat(mut self, path: &str, code: i32) -> Self {
        self.stat_failures.insert(PathBuf::from(path), code);
        self
    }

    fn insert(self, path: &str, mode: u32, uid: u32, gid: u32) -> Self {
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.insert(
                PathBuf::from(path),
                Node {
                    stat: FileStat {
                        mode,
                        uid,
                        gid,
                        size: 0,
                    },
                    data: Vec::new(),
                },
            );
        }
        self
    }

    /// Paths passed to `stat`, in order.
    pub fn stat_log(&self) -> Vec<String> {
        self.stat_log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// (fsuid, fsgid) observed by each mutating call, in order.
    pub fn seen_identities(&self) -> Vec<(u32, u32)> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn node(&self, path: &str) -> Option<FileStat> {
        self.nodes.lock().ok()?.get(Path::new(path)).map(|n| n.stat)
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        Some(self.nodes.lock().ok()?.get(Path::new(path))?.data.clone())
    }

    fn record_identity(&self) {
        let (uid, gid, _) = FakeCredentials::current();
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((uid, gid));
        }
    }

    fn allowed(stat: &FileStat, want: u32) -> bool {
        let (uid, gid, _) = FakeCredentials::current();
        if uid == 0 {
            return true;
        }
        let bits = if uid == stat.uid {
            stat.mode >> 6
        } else if gid == stat.gid {
            stat.mode >> 3
        } else {
            stat.mode
        };
        bits & want == want
    }

    /// Check every directory above `path` exists and is searchable.
    fn check_search(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<()> {
        let mut above: Vec<PathBuf> = ancestors(path).skip(1).collect();
        above.reverse();
        for dir in above {
            let Some(node) = nodes.get(&dir) else {
                return errno(libc::ENOENT);
            };
            if !node.stat.is_dir() {
                return errno(libc::ENOTDIR);
            }
            if !Self::allowed(&node.stat, X) {
                return errno(libc::EACCES);
            }
        }
        Ok(())
    }

    fn make_node(&self, path: &Path, kind: u32, mode: u32) -> io::Result<()> {
        self.record_identity();
        let mut nodes = self.nodes.lock().map_err(|_| io::Error::from_raw_os_error(libc::EIO))?;
        Self::check_search(&nodes, path)?;
        let parent = parent_dir(path).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        let parent_stat = nodes
            .get(&parent)
            .map(|n| n.stat)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        if !Self::allowed(&parent_stat, W | X) {
            return errno(libc::EACCES);
        }
        if nodes.contains_key(path) {
            return errno(libc::EEXIST);
        }

        let (uid, fsgid, _) = FakeCredentials::current();
        let mut mode = kind | (mode & 0o7777);
        let gid = if parent_stat.is_setgid() {
            if kind == libc::S_IFDIR {
                mode |= libc::S_ISGID;
            }
            parent_stat.gid
        } else {
            fsgid
        };
        nodes.insert(
            path.to_path_buf(),
            Node {
                stat: FileStat {
                    mode,
                    uid,
                    gid,
                    size: 0,
                },
                data: Vec::new(),
            },
        );
        Ok(())
    }
}

impl StorageBackend for FakeBackend {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        if let Ok(mut log) = self.stat_log.lock() {
            log.push(path.display().to_string());
        }
        if let Some(&code) = self.stat_failures.get(path) {
            return errno(code);
        }
        let nodes = self.nodes.lock().map_err(|_| io::Error::from_raw_os_error(libc::EIO))?;
        Self::check_search(&nodes, path)?;
        nodes
            .get(path)
            .map(|n| n.stat)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.make_node(path, libc::S_IFDIR, mode)
    }

    fn create(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.make_node(path, libc::S_IFREG, mode)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        self.record_identity();
        let mut nodes = self.nodes.lock().map_err(|_| io::Error::from_raw_os_error(libc::EIO))?;
        Self::check_search(&nodes, path)?;
        let parent = parent_dir(path).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        let parent_stat = nodes
            .get(&parent)
            .map(|n| n.stat)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        if !Self::allowed(&parent_stat, W | X) {
            return errno(libc::EACCES);
        }
        nodes
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        self.record_identity();
        let (fsuid, _, groups) = FakeCredentials::current();
        let mut nodes = self.nodes.lock().map_err(|_| io::Error::from_raw_os_error(libc::EIO))?;
        Self::check_search(&nodes, path)?;
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        if fsuid != 0 {
            let owner = node.stat.uid == fsuid;
            let uid_ok = uid.map_or(true, |u| u == node.stat.uid);
            let gid_ok = gid.map_or(true, |g| groups.contains(&g));
            if !(owner && uid_ok && gid_ok) {
                return errno(libc::EPERM);
            }
        }
        if let Some(uid) = uid {
            node.stat.uid = uid;
        }
        if let Some(gid) = gid {
            node.stat.gid = gid;
        }
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let nodes = self.nodes.lock().map_err(|_| io::Error::from_raw_os_error(libc::EIO))?;
        Self::check_search(&nodes, path)?;
        let dir = nodes
            .get(path)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        if !Self::allowed(&dir.stat, R) {
            return errno(libc::EACCES);
        }
        Ok(nodes
            .keys()
            .filter(|p| *p != path && parent_dir(p).as_deref() == Some(path))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    fn write(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<usize> {
        self.record_identity();
        let mut nodes = self.nodes.lock().map_err(|_| io::Error::from_raw_os_error(libc::EIO))?;
        Self::check_search(&nodes, path)?;
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        if !Self::allowed(&node.stat, W) {
            return errno(libc::EACCES);
        }
        let end = offset as usize + data.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[offset as usize..end].copy_from_slice(data);
        node.stat.size = node.data.len() as u64;
        Ok(data.len())
    }
}
