//! Boot-root file backend.
//!
//! The backend owns the directory tree served to booting clients. Each
//! bakeform gets one subdirectory, named after it, holding a copy of its boot
//! partition.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Storage for per-bakeform boot partition copies.
pub trait FileBackend: Send + Sync {
    /// Root of the exported boot tree.
    fn boot_root(&self) -> PathBuf;

    /// Copy the contents of `source` into `<boot_root>/<name>`.
    ///
    /// Returns the destination directory.
    fn copy_boot_folder(&self, source: &Path, name: &str) -> Result<PathBuf>;
}

/// [`FileBackend`] writing into a local directory that is shared over NFS.
#[derive(Debug, Clone)]
pub struct NfsBackend {
    boot_root: PathBuf,
}

impl NfsBackend {
    /// Create a backend rooted at `boot_root`, creating the directory if needed.
    pub fn new(boot_root: impl Into<PathBuf>) -> Result<Self> {
        let boot_root = boot_root.into();
        fs::create_dir_all(&boot_root)
            .map_err(|e| Error::storage(format!("create boot root {}", boot_root.display()), e))?;
        Ok(Self { boot_root })
    }
}

impl FileBackend for NfsBackend {
    fn boot_root(&self) -> PathBuf {
        self.boot_root.clone()
    }

    fn copy_boot_folder(&self, source: &Path, name: &str) -> Result<PathBuf> {
        let dest = self.boot_root.join(name);
        tracing::info!(source = %source.display(), dest = %dest.display(), "copying boot folder");

        copy_tree(source, &dest).map_err(|e| Error::copy(name, e))?;

        tracing::info!(dest = %dest.display(), "boot folder copied");
        Ok(dest)
    }
}

/// Recursively copy a directory, preserving symlinks and permissions.
fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    fs::set_permissions(dest, fs::metadata(source)?.permissions())?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(&from)?, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
