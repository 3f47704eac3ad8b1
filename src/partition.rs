//! Partition mapping.
//!
//! Exposes the partitions inside a raw disk image as block devices under
//! `/dev/mapper`, using `kpartx`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::process;

/// Directory where device-mapper nodes appear.
const DEV_MAPPER: &str = "/dev/mapper";

/// Maps an image file's partitions to block devices and tears them down again.
pub trait PartitionMapper: Send + Sync {
    /// Create mappings for every partition of `image`.
    ///
    /// Returns the device paths in partition order. Never returns an empty list;
    /// an image without partitions is a mapping error.
    fn map_partitions(&self, image: &Path) -> Result<Vec<PathBuf>>;

    /// Remove the mappings of `image`.
    ///
    /// Must be a no-op when the image has no active mappings.
    fn unmap_partitions(&self, image: &Path) -> Result<()>;
}

/// [`PartitionMapper`] backed by the `kpartx` utility.
#[derive(Debug, Clone)]
pub struct Kpartx {
    path: PathBuf,
    timeout: Duration,
}

impl Kpartx {
    /// Use the `kpartx` binary at `path`.
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    /// Whether any loop device is currently attached to `image`.
    fn has_loop_device(&self, image: &Path) -> Result<bool> {
        let mut cmd = Command::new("losetup");
        cmd.arg("-j").arg(image);
        let output = process::run(&mut cmd, self.timeout)?;

        if !output.status.success() {
            // Without losetup's answer, assume a mapping may exist and let kpartx decide.
            tracing::debug!(
                image = %image.display(),
                error = %process::failure_message(&output),
                "losetup -j failed"
            );
            return Ok(true);
        }

        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }
}

impl PartitionMapper for Kpartx {
    fn map_partitions(&self, image: &Path) -> Result<Vec<PathBuf>> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("-avs").arg(image);
        let output = process::run(&mut cmd, self.timeout)?;

        if !output.status.success() {
            return Err(Error::mapping(image, process::failure_message(&output)));
        }

        let devices = parse_added_maps(&String::from_utf8_lossy(&output.stdout));
        if devices.is_empty() {
            // kpartx may still have attached a loop device; release it.
            if let Err(e) = self.unmap_partitions(image) {
                tracing::warn!(image = %image.display(), error = %e, "cleanup: unmap after empty mapping");
            }
            return Err(Error::mapping(image, "no partitions found"));
        }

        tracing::info!(image = %image.display(), partitions = devices.len(), "mapped partitions");
        Ok(devices)
    }

    fn unmap_partitions(&self, image: &Path) -> Result<()> {
        if !self.has_loop_device(image)? {
            tracing::info!(image = %image.display(), "no active partition mappings, nothing to unmap");
            return Ok(());
        }

        let mut cmd = Command::new(&self.path);
        cmd.arg("-d").arg(image);
        let output = process::run(&mut cmd, self.timeout)?;

        if !output.status.success() {
            return Err(Error::mapping(image, process::failure_message(&output)));
        }

        tracing::info!(image = %image.display(), "unmapped partitions");
        Ok(())
    }
}

/// Parse `kpartx -av` output into device-mapper paths.
///
/// Lines look like `add map loop0p1 (253:0): 0 524288 linear 7:0 8192`.
fn parse_added_maps(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("add map "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(|dev| Path::new(DEV_MAPPER).join(dev))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_added_maps() {
        let out = "add map loop3p1 (253:0): 0 524288 linear 7:3 8192\n\
                   add map loop3p2 (253:1): 0 3620864 linear 7:3 532480\n";
        assert_eq!(
            parse_added_maps(out),
            vec![
                PathBuf::from("/dev/mapper/loop3p1"),
                PathBuf::from("/dev/mapper/loop3p2"),
            ]
        );
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert!(parse_added_maps("").is_empty());
        assert!(parse_added_maps("loop deleted : /dev/loop3\n").is_empty());
    }

    #[test]
    fn test_missing_binary_is_error() {
        let kpartx = Kpartx::new("/nonexistent/kpartx", Duration::from_secs(5));
        assert!(kpartx.map_partitions(Path::new("/nonexistent.img")).is_err());
    }
}
