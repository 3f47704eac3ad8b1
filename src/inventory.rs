//! The bakeform inventory.
//!
//! Owns every [`Bakeform`] found in the image folder, keyed by name. Each
//! [`load`](BakeformInventory::load) rescans the folder, makes sure every image
//! has its boot partition copied into the boot root (mount, copy, unmount, once
//! per image), builds a fresh mapping and swaps it in whole. Readers always see
//! either the previous mapping or the new one.
//!
//! Mutating operations (`load`, `upload`, `delete`) are serialized by a reload
//! lock. `list` only takes the content lock for the duration of an `Arc`
//! clone, so it never waits on mount or copy work.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::NfsBackend;
use crate::bakeform::{Bakeform, Host};
use crate::config::InventoryConfig;
use crate::error::{Error, Result};
use crate::mount::{MountController, SystemMounter};
use crate::partition::Kpartx;

/// Bakeforms by name.
pub type BakeformList = HashMap<String, Arc<Bakeform>>;

/// Extension of image files in the image folder.
pub const IMAGE_EXTENSION: &str = "img";

/// Staged uploads are hidden and never carry the image extension.
const UPLOAD_PREFIX: &str = ".upload-";
const UPLOAD_SUFFIX: &str = ".partial";

/// The set of bakeforms in one image folder.
pub struct BakeformInventory {
    folder: PathBuf,
    host: Arc<Host>,
    /// Serializes load/upload/delete.
    reload: Mutex<()>,
    content: RwLock<Arc<BakeformList>>,
}

impl BakeformInventory {
    /// Create an inventory over `folder` and load it.
    pub fn new(folder: impl Into<PathBuf>, host: Arc<Host>) -> Result<Self> {
        let inventory = Self {
            folder: folder.into(),
            host,
            reload: Mutex::new(()),
            content: RwLock::new(Arc::new(BakeformList::new())),
        };
        inventory.load()?;
        Ok(inventory)
    }

    /// Create an inventory backed by kpartx, the system mounter and the NFS boot root.
    pub fn open(config: &InventoryConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.mount_root).map_err(|e| {
            Error::storage(format!("create mount root {}", config.mount_root.display()), e)
        })?;

        let host = Host {
            mapper: Arc::new(Kpartx::new(&config.kpartx_path, config.command_timeout)),
            mounts: MountController::new(
                &config.mount_root,
                Arc::new(SystemMounter::new(config.command_timeout)),
            ),
            backend: Arc::new(NfsBackend::new(&config.boot_root)?),
        };

        Self::new(&config.image_folder, Arc::new(host))
    }

    /// The image folder.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Rescan the image folder and replace the inventory content.
    pub fn load(&self) -> Result<()> {
        let _reload = self.reload.lock();
        self.load_locked()
    }

    /// Current inventory snapshot.
    pub fn list(&self) -> Arc<BakeformList> {
        self.content.read().clone()
    }

    /// Look up one bakeform.
    pub fn get(&self, name: &str) -> Result<Arc<Bakeform>> {
        self.content
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Store a new image named `name` from `body`, then reload.
    ///
    /// Refuses to overwrite an existing image. The bytes are staged in a hidden
    /// temp file and only renamed into place once fully written, so a failed
    /// transfer never leaves an image for the scan to pick up.
    pub fn upload<R: Read + ?Sized>(&self, name: &str, body: &mut R) -> Result<Arc<Bakeform>> {
        check_name(name)?;
        let path = self.image_path(name);
        if path.exists() {
            return Err(Error::Conflict(name.to_string()));
        }

        tracing::info!(bakeform = %name, path = %path.display(), "receiving upload");

        let mut staged = tempfile::Builder::new()
            .prefix(UPLOAD_PREFIX)
            .suffix(UPLOAD_SUFFIX)
            .tempfile_in(&self.folder)
            .map_err(|e| Error::storage("create image file", e))?;

        let bytes = std::io::copy(body, &mut staged).map_err(|e| Error::storage("save image", e))?;
        staged
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| Error::storage("save image", e))?;

        let _reload = self.reload.lock();
        let boot_copy = self.host.backend.boot_root().join(name);
        let had_boot_copy = boot_copy.exists();

        staged.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                Error::Conflict(name.to_string())
            } else {
                Error::storage("publish image", e.error)
            }
        })?;
        tracing::info!(bakeform = %name, bytes, "upload stored");

        // An image that cannot be loaded would fail every later reload and is
        // unreachable by delete, so the upload is undone.
        if let Err(e) = self.load_locked() {
            tracing::warn!(bakeform = %name, error = %e, "load after upload failed, removing image");
            if let Err(rm) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %rm, "cleanup: remove uploaded image");
            }
            if !had_boot_copy {
                remove_partial_copy(&boot_copy);
            }
            return Err(e);
        }
        self.get(name)
    }

    /// Delete a bakeform's image and boot copy, then reload.
    ///
    /// The reload runs even when the delete fails part way, so the inventory
    /// reflects whatever is left on disk. A reload failure after a successful
    /// delete is reported; the delete is not undone.
    pub fn delete(&self, name: &str) -> Result<()> {
        let _reload = self.reload.lock();

        let bakeform = self.get(name)?;
        let deleted = bakeform.delete();
        if let Err(e) = &deleted {
            tracing::warn!(bakeform = %name, error = %e, "delete failed, reloading anyway");
        }

        let reloaded = self.load_locked();
        if let Err(e) = &reloaded {
            tracing::error!(error = %e, "reload after delete failed");
        }

        deleted?;
        reloaded
    }

    /// Unmount every bakeform, continuing past failures.
    ///
    /// Waits for an in-flight load, upload or delete to finish first.
    pub fn unmount_all(&self) -> Result<()> {
        let _reload = self.reload.lock();
        let content = self.list();
        let mut errors = Vec::new();

        for (name, bakeform) in content.iter() {
            if let Err(e) = bakeform.unmount() {
                tracing::warn!(bakeform = %name, error = %e, "unmount failed");
                errors.push(format!("{}: {}", name, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Cleanup {
                name: "inventory".to_string(),
                errors,
            })
        }
    }

    fn image_path(&self, name: &str) -> PathBuf {
        self.folder.join(format!("{}.{}", name, IMAGE_EXTENSION))
    }

    /// Build and swap in a fresh mapping. Caller holds `reload`.
    fn load_locked(&self) -> Result<()> {
        let images = scan_images(&self.folder)?;
        let previous = self.list();
        let mut list = BakeformList::with_capacity(images.len());

        for (name, location) in images {
            // Keep existing objects so in-flight mount state and locks survive reloads.
            let bakeform = match previous.get(&name) {
                Some(existing) if existing.location() == location.as_path() => existing.clone(),
                _ => {
                    tracing::info!(bakeform = %name, "loading image");
                    Arc::new(Bakeform::new(name.clone(), location, self.host.clone()))
                }
            };

            self.ensure_boot_copy(&bakeform)?;
            list.insert(name, bakeform);
        }

        tracing::debug!(count = list.len(), "inventory loaded");
        *self.content.write() = Arc::new(list);
        Ok(())
    }

    /// Copy the first partition into the boot root unless a copy already exists.
    ///
    /// The bakeform is always unmounted again, even when the copy fails. A
    /// failed copy's partial directory is removed so the next load retries.
    fn ensure_boot_copy(&self, bakeform: &Bakeform) -> Result<()> {
        if bakeform.has_boot_copy() {
            tracing::debug!(bakeform = %bakeform.name(), "boot copy present");
            return Ok(());
        }

        tracing::info!(bakeform = %bakeform.name(), "boot copy missing, copying boot partition");
        let mounted = bakeform.mount()?;

        let copied = match mounted.first() {
            Some(boot) => self.host.backend.copy_boot_folder(boot, bakeform.name()),
            None => Err(Error::copy(bakeform.name(), "no mounted partitions")),
        };

        if let Err(e) = bakeform.unmount() {
            tracing::warn!(bakeform = %bakeform.name(), error = %e, "cleanup: unmount after boot copy");
        }

        if let Err(e) = copied {
            remove_partial_copy(bakeform.boot_location());
            return Err(e);
        }
        Ok(())
    }
}

/// List `(name, path)` for every image file in `folder`, sorted by name.
fn scan_images(folder: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = std::fs::read_dir(folder)
        .map_err(|e| Error::storage(format!("scan image folder {}", folder.display()), e))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| Error::storage(format!("scan image folder {}", folder.display()), e))?
            .path();

        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(IMAGE_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            tracing::warn!(path = %path.display(), "skipping image with non-UTF-8 name");
            continue;
        };
        // Dot-names are staged uploads or otherwise hidden; never bakeforms.
        if name.is_empty() || name.starts_with('.') {
            tracing::debug!(path = %path.display(), "skipping hidden image");
            continue;
        }
        images.push((name.to_string(), path.clone()));
    }

    images.sort();
    Ok(images)
}

/// Reject names that would escape the image folder or hide the file.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(&['/', '\\', '\0'][..]) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

fn remove_partial_copy(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => tracing::info!(path = %dir.display(), "removed partial boot copy"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "cleanup: remove partial boot copy")
        }
    }
}
