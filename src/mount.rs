//! Mounting mapped partitions.
//!
//! [`MountController`] owns the mount root and lays out one directory per
//! bakeform and partition: `<root>/<name>/<index>`. The actual mount syscalls
//! sit behind the [`Mounter`] trait.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::process;

/// Mounts and unmounts block devices.
pub trait Mounter: Send + Sync {
    /// Mount `device` on the existing directory `target`.
    fn mount(&self, device: &Path, target: &Path) -> Result<()>;

    /// Unmount `target`. A target that is not mounted is not an error.
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// [`Mounter`] using `mount(8)` (for filesystem autodetection) and `umount2(2)`.
#[derive(Debug, Clone)]
pub struct SystemMounter {
    timeout: Duration,
}

impl SystemMounter {
    /// Create a mounter whose `mount` invocations are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Mounter for SystemMounter {
    fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        let mut cmd = Command::new("mount");
        cmd.arg(device).arg(target);
        let output = process::run(&mut cmd, self.timeout)?;

        if !output.status.success() {
            return Err(Error::Mount {
                device: device.to_path_buf(),
                target: target.to_path_buf(),
                message: process::failure_message(&output),
            });
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let c_target = CString::new(target.as_os_str().as_bytes()).map_err(|e| Error::Unmount {
            target: target.to_path_buf(),
            message: e.to_string(),
        })?;

        let rc = unsafe { libc::umount2(c_target.as_ptr(), 0) };
        if rc == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINVAL) | Some(libc::ENOENT) => {
                tracing::warn!(target = %target.display(), error = %err, "not mounted, skipping unmount");
                Ok(())
            }
            _ => Err(Error::Unmount {
                target: target.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }
}

/// Places partition mounts under a mount root.
#[derive(Clone)]
pub struct MountController {
    root: PathBuf,
    mounter: Arc<dyn Mounter>,
}

impl MountController {
    /// Create a controller rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            root: root.into(),
            mounter,
        }
    }

    /// The mount root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mount point for partition `index` of bakeform `name`.
    pub fn target_for(&self, name: &str, index: usize) -> PathBuf {
        self.root.join(name).join(index.to_string())
    }

    /// Create `target` if needed and mount `device` there.
    ///
    /// On failure the freshly created directory is removed again.
    pub fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        std::fs::create_dir_all(target).map_err(|e| Error::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            message: format!("create mount point: {}", e),
        })?;

        if let Err(e) = self.mounter.mount(device, target) {
            remove_empty_dir(target);
            return Err(e);
        }

        tracing::debug!(device = %device.display(), target = %target.display(), "mounted");
        Ok(())
    }

    /// Unmount `target` and remove its (now empty) directory.
    pub fn unmount(&self, target: &Path) -> Result<()> {
        self.mounter.unmount(target)?;
        remove_empty_dir(target);
        tracing::debug!(target = %target.display(), "unmounted");
        Ok(())
    }

    /// Remove the per-bakeform directory once all its mount points are gone.
    pub fn release(&self, name: &str) {
        remove_empty_dir(&self.root.join(name));
    }
}

/// Best-effort `rmdir`; a non-empty or missing directory is left alone.
fn remove_empty_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %dir.display(), error = %e, "cleanup: remove mount directory");
        }
    }
}
