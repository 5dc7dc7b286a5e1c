//! Backend that maps request paths onto a local directory.
//!
//! Every call is a plain syscall on the calling thread, so the kernel applies
//! whatever fs credentials the thread holds at the time.

use super::{FileStat, StorageBackend};

use nix::unistd::{Gid, Uid};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

/// Passthrough backend rooted at a local directory.
///
/// Request paths are interpreted relative to the root: `/data/x` maps to
/// `<root>/data/x`. `..` components are rejected with `EINVAL`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root_path: PathBuf,
}

impl LocalBackend {
    /// Create a new backend rooted at the given path.
    pub fn new<P: Into<PathBuf>>(root_path: P) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    /// Get the root path.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let mut full = self.root_path.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => full.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::from_raw_os_error(libc::EINVAL));
                }
            }
        }
        Ok(full)
    }
}

impl StorageBackend for LocalBackend {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = fs::metadata(self.resolve(path)?)?;
        Ok(FileStat {
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
        })
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        let full = self.resolve(path)?;
        tracing::debug!(target: "backend", path = %full.display(), mode, "mkdir");
        DirBuilder::new().mode(mode).create(full)
    }

    fn create(&self, path: &Path, mode: u32) -> io::Result<()> {
        let full = self.resolve(path)?;
        tracing::debug!(target: "backend", path = %full.display(), mode, "create");
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(full)
            .map(|_| ())
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(self.resolve(path)?)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.resolve(path)?)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(self.resolve(from)?, self.resolve(to)?)
    }

    fn truncate(&self, path: &Path, size: u64) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .open(self.resolve(path)?)?
            .set_len(size)
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(self.resolve(path)?, fs::Permissions::from_mode(mode))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        nix::unistd::chown(
            &self.resolve(path)?,
            uid.map(Uid::from_raw),
            gid.map(Gid::from_raw),
        )
        .map_err(io::Error::from)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.resolve(path)?)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn read(&self, path: &Path, offset: u64, size: u32) -> io::Result<Vec<u8>> {
        let file = OpenOptions::new().read(true).open(self.resolve(path)?)?;
        let mut buf = vec![0u8; size as usize];
        let n = file.read_at(&mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<usize> {
        let file = OpenOptions::new().write(true).open(self.resolve(path)?)?;
        file.write_at(data, offset)
    }
}
