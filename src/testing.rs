//! In-memory stand-ins for the OS collaborators, for tests that must run without root.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::FileBackend;
use crate::bakeform::{Bakeform, Host};
use crate::error::{Error, Result};
use crate::mount::{MountController, Mounter};
use crate::partition::PartitionMapper;

/// File the fake mounter drops into each mount point, holding the device path.
pub const PARTITION_MARKER: &str = "partition";

/// Fake partition mapper: `<stem>p1..pN` under `/dev/mapper`.
pub struct FakeMapper {
    partitions: AtomicUsize,
    map_calls: AtomicUsize,
    delay: Mutex<Duration>,
    active: Mutex<HashSet<PathBuf>>,
}

impl Default for FakeMapper {
    fn default() -> Self {
        Self {
            partitions: AtomicUsize::new(2),
            map_calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            active: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeMapper {
    pub fn set_partitions(&self, n: usize) {
        self.partitions.store(n, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn map_calls(&self) -> usize {
        self.map_calls.load(Ordering::SeqCst)
    }

    pub fn is_mapped(&self, image: &Path) -> bool {
        self.active.lock().contains(image)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

impl PartitionMapper for FakeMapper {
    fn map_partitions(&self, image: &Path) -> Result<Vec<PathBuf>> {
        self.map_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if !image.exists() {
            return Err(Error::mapping(image, "image does not exist"));
        }
        let n = self.partitions.load(Ordering::SeqCst);
        if n == 0 {
            return Err(Error::mapping(image, "no partitions found"));
        }

        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.active.lock().insert(image.to_path_buf());
        Ok((1..=n)
            .map(|i| PathBuf::from(format!("/dev/mapper/{}p{}", stem, i)))
            .collect())
    }

    fn unmap_partitions(&self, image: &Path) -> Result<()> {
        self.active.lock().remove(image);
        Ok(())
    }
}

/// Fake mounter that records mount points and writes a marker file into each.
#[derive(Default)]
pub struct FakeMounter {
    mounted: Mutex<Vec<PathBuf>>,
    failing_devices: Mutex<HashSet<PathBuf>>,
    failing_targets: Mutex<HashSet<PathBuf>>,
}

impl FakeMounter {
    pub fn fail_device(&self, device: &str) {
        self.failing_devices.lock().insert(PathBuf::from(device));
    }

    pub fn fail_unmount(&self, target: &Path) {
        self.failing_targets.lock().insert(target.to_path_buf());
    }

    pub fn clear_failures(&self) {
        self.failing_devices.lock().clear();
        self.failing_targets.lock().clear();
    }

    pub fn mounted(&self) -> Vec<PathBuf> {
        self.mounted.lock().clone()
    }
}

impl Mounter for FakeMounter {
    fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        if self.failing_devices.lock().contains(device) {
            return Err(Error::Mount {
                device: device.to_path_buf(),
                target: target.to_path_buf(),
                message: "wrong fs type".into(),
            });
        }
        std::fs::write(
            target.join(PARTITION_MARKER),
            device.to_string_lossy().as_bytes(),
        )?;
        self.mounted.lock().push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        if self.failing_targets.lock().contains(target) {
            return Err(Error::Unmount {
                target: target.to_path_buf(),
                message: "target is busy".into(),
            });
        }
        let mut mounted = self.mounted.lock();
        if let Some(pos) = mounted.iter().position(|m| m == target) {
            mounted.remove(pos);
            let _ = std::fs::remove_file(target.join(PARTITION_MARKER));
        }
        Ok(())
    }
}

/// Fake boot-root backend that counts copies and can be told to fail midway.
pub struct FakeBackend {
    root: PathBuf,
    copies: AtomicUsize,
    fail: AtomicBool,
}

impl FakeBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            copies: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl FileBackend for FakeBackend {
    fn boot_root(&self) -> PathBuf {
        self.root.clone()
    }

    fn copy_boot_folder(&self, source: &Path, name: &str) -> Result<PathBuf> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        let dest = self.root.join(name);
        std::fs::create_dir_all(&dest)?;

        if self.fail.load(Ordering::SeqCst) {
            std::fs::write(dest.join("half-written"), b"")?;
            return Err(Error::copy(name, "disk full"));
        }

        std::fs::copy(source.join(PARTITION_MARKER), dest.join(PARTITION_MARKER))?;
        Ok(dest)
    }
}

/// Scratch directories plus fake collaborators wired into a [`Host`].
pub struct TestHost {
    pub dir: tempfile::TempDir,
    pub mapper: Arc<FakeMapper>,
    pub mounter: Arc<FakeMounter>,
    pub backend: Arc<FakeBackend>,
    pub host: Arc<Host>,
}

impl TestHost {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        for sub in ["images", "mnt", "boot"] {
            std::fs::create_dir_all(dir.path().join(sub)).expect("create test dir");
        }

        let mapper = Arc::new(FakeMapper::default());
        let mounter = Arc::new(FakeMounter::default());
        let backend = Arc::new(FakeBackend::new(dir.path().join("boot")));
        let host = Arc::new(Host {
            mapper: mapper.clone(),
            mounts: MountController::new(dir.path().join("mnt"), mounter.clone()),
            backend: backend.clone(),
        });

        Self {
            dir,
            mapper,
            mounter,
            backend,
            host,
        }
    }

    pub fn images(&self) -> PathBuf {
        self.dir.path().join("images")
    }

    pub fn mount_root(&self) -> PathBuf {
        self.dir.path().join("mnt")
    }

    pub fn boot_root(&self) -> PathBuf {
        self.dir.path().join("boot")
    }

    /// Write `<images>/<name>.img` with some bytes.
    pub fn add_image(&self, name: &str) -> PathBuf {
        let path = self.images().join(format!("{}.img", name));
        std::fs::write(&path, format!("image {}", name)).expect("write image");
        path
    }

    /// An image file plus a bakeform for it.
    pub fn bakeform(&self, name: &str) -> Bakeform {
        let path = self.add_image(name);
        Bakeform::new(name, path, self.host.clone())
    }
}
