//! Storage backend interface.
//!
//! The gateway never touches the filesystem itself; it opens an identity
//! scope and hands the request to a `StorageBackend`. Backends run
//! synchronously (they may block) on the thread that holds the scope, so the
//! kernel sees the impersonated credentials.

mod local;

pub use local::LocalBackend;

use std::io;
use std::path::{Path, PathBuf};

/// Ownership and mode of a filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

impl FileStat {
    /// Set-group-id bit: children created inside inherit this node's group.
    pub fn is_setgid(&self) -> bool {
        self.mode & libc::S_ISGID != 0
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }
}

/// A filesystem operation forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Stat { path: PathBuf },
    Mkdir { path: PathBuf, mode: u32 },
    Create { path: PathBuf, mode: u32 },
    Rmdir { path: PathBuf },
    Unlink { path: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
    Truncate { path: PathBuf, size: u64 },
    Chmod { path: PathBuf, mode: u32 },
    ReadDir { path: PathBuf },
    Read { path: PathBuf, offset: u64, size: u32 },
    Write { path: PathBuf, offset: u64, data: Vec<u8> },
}

impl Request {
    /// Path whose permissions govern the operation.
    pub fn path(&self) -> &Path {
        match self {
            Self::Stat { path }
            | Self::Mkdir { path, .. }
            | Self::Create { path, .. }
            | Self::Rmdir { path }
            | Self::Unlink { path }
            | Self::Truncate { path, .. }
            | Self::Chmod { path, .. }
            | Self::ReadDir { path }
            | Self::Read { path, .. }
            | Self::Write { path, .. } => path,
            Self::Rename { from, .. } => from,
        }
    }

    /// Whether a successful request leaves a new node at `path()`.
    pub fn creates_node(&self) -> bool {
        matches!(self, Self::Mkdir { .. } | Self::Create { .. })
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Stat { .. } => "stat",
            Self::Mkdir { .. } => "mkdir",
            Self::Create { .. } => "create",
            Self::Rmdir { .. } => "rmdir",
            Self::Unlink { .. } => "unlink",
            Self::Rename { .. } => "rename",
            Self::Truncate { .. } => "truncate",
            Self::Chmod { .. } => "chmod",
            Self::ReadDir { .. } => "readdir",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
        }
    }
}

/// Result of a backend request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Attr(FileStat),
    Entries(Vec<String>),
    Data(Vec<u8>),
    Written(usize),
    Error { errno: i32 },
}

impl Response {
    pub fn error(errno: i32) -> Self {
        Self::Error { errno }
    }

    pub fn from_io(err: &io::Error) -> Self {
        Self::error(err.raw_os_error().unwrap_or(libc::EIO))
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Error { errno } => Some(*errno),
            _ => None,
        }
    }

    /// Negative errno on failure, 0 on success.
    pub fn result_code(&self) -> i32 {
        self.errno().map_or(0, |e| -e)
    }

    pub fn is_ok(&self) -> bool {
        self.errno().is_none()
    }
}

fn enosys<T>() -> io::Result<T> {
    Err(io::Error::from_raw_os_error(libc::ENOSYS))
}

/// Filesystem primitives invoked under an active identity scope.
///
/// Only `stat` is required; it is also what the supplementary group resolver
/// inspects ancestors with. The remaining operations default to `ENOSYS`.
pub trait StorageBackend: Send + Sync {
    /// Handle a complete request by dispatching to the individual operations.
    fn handle_request(&self, request: &Request) -> Response {
        let result = match request {
            Request::Stat { path } => self.stat(path).map(Response::Attr),
            Request::Mkdir { path, mode } => self.mkdir(path, *mode).map(|_| Response::Ok),
            Request::Create { path, mode } => self.create(path, *mode).map(|_| Response::Ok),
            Request::Rmdir { path } => self.rmdir(path).map(|_| Response::Ok),
            Request::Unlink { path } => self.unlink(path).map(|_| Response::Ok),
            Request::Rename { from, to } => self.rename(from, to).map(|_| Response::Ok),
            Request::Truncate { path, size } => self.truncate(path, *size).map(|_| Response::Ok),
            Request::Chmod { path, mode } => self.chmod(path, *mode).map(|_| Response::Ok),
            Request::ReadDir { path } => self.read_dir(path).map(Response::Entries),
            Request::Read { path, offset, size } => {
                self.read(path, *offset, *size).map(Response::Data)
            }
            Request::Write { path, offset, data } => {
                self.write(path, *offset, data).map(Response::Written)
            }
        };
        result.unwrap_or_else(|e| Response::from_io(&e))
    }

    /// Stat a path. Must report a missing node as `ENOENT`.
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    fn mkdir(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        enosys()
    }

    /// Create an empty regular file; fails if it exists.
    fn create(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        enosys()
    }

    fn rmdir(&self, _path: &Path) -> io::Result<()> {
        enosys()
    }

    fn unlink(&self, _path: &Path) -> io::Result<()> {
        enosys()
    }

    fn rename(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        enosys()
    }

    fn truncate(&self, _path: &Path, _size: u64) -> io::Result<()> {
        enosys()
    }

    fn chmod(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        enosys()
    }

    /// Change ownership; `None` leaves that id unchanged.
    fn chown(&self, _path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> io::Result<()> {
        enosys()
    }

    fn read_dir(&self, _path: &Path) -> io::Result<Vec<String>> {
        enosys()
    }

    fn read(&self, _path: &Path, _offset: u64, _size: u32) -> io::Result<Vec<u8>> {
        enosys()
    }

    fn write(&self, _path: &Path, _offset: u64, _data: &[u8]) -> io::Result<usize> {
        enosys()
    }
}
