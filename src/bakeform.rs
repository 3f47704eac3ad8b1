//! A single bakeform: one disk image plus its transient mount state.
//!
//! # Lifecycle
//!
//! ```text
//! Unmounted --mount--> Mounted --unmount--> Unmounted
//! Mounted   --mount--> rejected (AlreadyMounted)
//! any       --delete-> Removed (dropped from the inventory on next load)
//! ```
//!
//! `mount`, `unmount` and `delete` on the same bakeform are serialized by a
//! per-bakeform lock; different bakeforms can be worked on concurrently.
//! Mount state is never persisted and must be reversed before the image is
//! removed or the process exits.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::FileBackend;
use crate::error::{Error, Result};
use crate::mount::MountController;
use crate::partition::PartitionMapper;

/// OS-facing collaborators shared by every bakeform.
pub struct Host {
    /// Partition mapper (kpartx in production).
    pub mapper: Arc<dyn PartitionMapper>,
    /// Mount placement under the mount root.
    pub mounts: MountController,
    /// Boot-root storage.
    pub backend: Arc<dyn FileBackend>,
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BakeformState {
    Unmounted,
    Mounted,
    /// The backing image is gone.
    Removed,
}

impl std::fmt::Display for BakeformState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BakeformState::Unmounted => write!(f, "unmounted"),
            BakeformState::Mounted => write!(f, "mounted"),
            BakeformState::Removed => write!(f, "removed"),
        }
    }
}

/// A managed disk image.
pub struct Bakeform {
    name: String,
    location: PathBuf,
    boot_location: PathBuf,
    host: Arc<Host>,
    /// Held for the whole of mount/unmount/delete.
    op: Mutex<()>,
    /// Mount points in partition order; non-empty only while mounted.
    mounted_on: RwLock<Vec<PathBuf>>,
}

impl std::fmt::Debug for Bakeform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bakeform")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("boot_location", &self.boot_location)
            .field("mounted_on", &*self.mounted_on.read())
            .finish()
    }
}

impl Bakeform {
    /// Create an unmounted bakeform for the image at `location`.
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>, host: Arc<Host>) -> Self {
        let name = name.into();
        let boot_location = host.backend.boot_root().join(&name);
        Self {
            name,
            location: location.into(),
            boot_location,
            host,
            op: Mutex::new(()),
            mounted_on: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing `.img` file.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Where the boot partition copy lives under the boot root.
    pub fn boot_location(&self) -> &Path {
        &self.boot_location
    }

    /// Snapshot of the current mount points.
    pub fn mounted_on(&self) -> Vec<PathBuf> {
        self.mounted_on.read().clone()
    }

    pub fn is_mounted(&self) -> bool {
        !self.mounted_on.read().is_empty()
    }

    /// Whether the one-time boot copy has already been made.
    pub fn has_boot_copy(&self) -> bool {
        self.boot_location.exists()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BakeformState {
        if self.is_mounted() {
            BakeformState::Mounted
        } else if !self.location.exists() {
            BakeformState::Removed
        } else {
            BakeformState::Unmounted
        }
    }

    /// Map the image's partitions and mount each one.
    ///
    /// Returns the mount points in partition order. If any partition fails to
    /// mount, everything established so far is unmounted and unmapped before
    /// the error is returned.
    pub fn mount(&self) -> Result<Vec<PathBuf>> {
        let _op = self.op.lock();

        if self.is_mounted() {
            return Err(Error::AlreadyMounted(self.name.clone()));
        }

        let devices = self.host.mapper.map_partitions(&self.location)?;

        for (index, device) in devices.iter().enumerate() {
            let target = self.host.mounts.target_for(&self.name, index);
            if let Err(e) = self.host.mounts.mount(device, &target) {
                tracing::warn!(
                    bakeform = %self.name,
                    partition = index,
                    error = %e,
                    "partition mount failed, rolling back"
                );
                if let Err(cleanup) = self.teardown() {
                    tracing::warn!(bakeform = %self.name, error = %cleanup, "rollback incomplete");
                }
                return Err(e);
            }
            self.mounted_on.write().push(target);
        }

        tracing::info!(bakeform = %self.name, partitions = devices.len(), "mounted");
        Ok(self.mounted_on())
    }

    /// Unmount every partition and remove the mappings.
    ///
    /// A no-op on an unmounted bakeform.
    pub fn unmount(&self) -> Result<()> {
        let _op = self.op.lock();

        if !self.is_mounted() {
            return Ok(());
        }
        self.teardown()?;
        tracing::info!(bakeform = %self.name, "unmounted");
        Ok(())
    }

    /// Remove the backing image and the boot copy, unmounting first if needed.
    pub fn delete(&self) -> Result<()> {
        let _op = self.op.lock();

        if self.is_mounted() {
            // Removing an image out from under live mounts would leak them.
            self.teardown().map_err(|e| Error::Delete {
                name: self.name.clone(),
                errors: vec![format!("unmount: {}", e)],
            })?;
        }

        let mut errors = Vec::new();

        if let Err(e) = std::fs::remove_file(&self.location) {
            if e.kind() != std::io::ErrorKind::NotFound {
                errors.push(format!("remove image {}: {}", self.location.display(), e));
            }
        }

        if let Err(e) = std::fs::remove_dir_all(&self.boot_location) {
            if e.kind() != std::io::ErrorKind::NotFound {
                errors.push(format!(
                    "remove boot copy {}: {}",
                    self.boot_location.display(),
                    e
                ));
            }
        }

        if !errors.is_empty() {
            return Err(Error::Delete {
                name: self.name.clone(),
                errors,
            });
        }

        tracing::info!(bakeform = %self.name, "deleted");
        Ok(())
    }

    /// Unmount all tracked mount points, then unmap. Caller holds `op`.
    ///
    /// Mount points that fail to unmount stay tracked, and the mapping is kept
    /// while any of them remain.
    fn teardown(&self) -> Result<()> {
        let targets = self.mounted_on();
        let mut still_mounted = Vec::new();
        let mut errors = Vec::new();

        for target in targets.iter().rev() {
            if let Err(e) = self.host.mounts.unmount(target) {
                tracing::warn!(bakeform = %self.name, target = %target.display(), error = %e, "unmount failed");
                errors.push(e.to_string());
                still_mounted.push(target.clone());
            }
        }
        still_mounted.reverse();
        let fully_unmounted = still_mounted.is_empty();
        *self.mounted_on.write() = still_mounted;

        if fully_unmounted {
            if let Err(e) = self.host.mapper.unmap_partitions(&self.location) {
                tracing::warn!(bakeform = %self.name, error = %e, "unmap failed");
                errors.push(e.to_string());
            }
            self.host.mounts.release(&self.name);
        } else {
            tracing::warn!(bakeform = %self.name, "partitions still mounted, keeping mappings");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Cleanup {
                name: self.name.clone(),
                errors,
            })
        }
    }
}
