//! bakery configuration.
//!
//! Settings come from an optional TOML file, then CLI flags and environment
//! variables override individual fields (see the binary's `ConfigArgs`).
//! [`BakeryConfig::validate`] produces the [`InventoryConfig`] the inventory is
//! built from; a missing image folder or mount root is fatal.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name for config file storage.
const APP_NAME: &str = "bakery";

/// Default location of the NFS boot tree.
pub const DEFAULT_BOOT_ROOT: &str = "/srv/nfs/boot";

/// Default NFS export table.
pub const DEFAULT_EXPORTS_PATH: &str = "/etc/exports";

/// Global bakery configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BakeryConfig {
    /// Folder scanned for `*.img` files.
    pub image_folder: Option<PathBuf>,

    /// Directory under which partitions are mounted.
    pub mount_root: Option<PathBuf>,

    /// NFS boot tree receiving one copy per bakeform.
    pub boot_root: PathBuf,

    /// Path or name of the kpartx binary.
    pub kpartx_path: PathBuf,

    /// NFS export table rewritten by `regen-exports`.
    pub exports_path: PathBuf,

    /// HTTP listen address.
    pub listen: String,

    /// Bound on each external command, humantime format (e.g. "2m").
    pub command_timeout: String,

    /// Bound on each HTTP request, humantime format.
    pub request_timeout: String,
}

impl Default for BakeryConfig {
    fn default() -> Self {
        Self {
            image_folder: None,
            mount_root: None,
            boot_root: PathBuf::from(DEFAULT_BOOT_ROOT),
            kpartx_path: PathBuf::from("kpartx"),
            exports_path: PathBuf::from(DEFAULT_EXPORTS_PATH),
            listen: "127.0.0.1:8080".to_string(),
            command_timeout: "2m".to_string(),
            request_timeout: "30m".to_string(),
        }
    }
}

/// Validated settings needed to build an inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryConfig {
    pub image_folder: PathBuf,
    pub mount_root: PathBuf,
    pub boot_root: PathBuf,
    pub kpartx_path: PathBuf,
    pub command_timeout: Duration,
}

impl BakeryConfig {
    /// Default config file location (`~/.config/bakery/config.toml` on Linux).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_NAME).join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if present, otherwise the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::config(format!("read {}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(e.to_string()))
    }

    /// Parsed external command timeout.
    pub fn command_timeout(&self) -> Result<Duration> {
        parse_duration("command_timeout", &self.command_timeout)
    }

    /// Parsed HTTP request timeout.
    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration("request_timeout", &self.request_timeout)
    }

    /// Check required settings and produce an [`InventoryConfig`].
    pub fn validate(&self) -> Result<InventoryConfig> {
        let (image_folder, mount_root) = match (&self.image_folder, &self.mount_root) {
            (Some(folder), Some(root)) if !folder.as_os_str().is_empty() && !root.as_os_str().is_empty() => {
                (folder.clone(), root.clone())
            }
            _ => {
                return Err(Error::config(
                    "please set IMAGE_FOLDER and IMAGE_MOUNT_ROOT",
                ))
            }
        };

        if !image_folder.is_dir() {
            return Err(Error::config(format!(
                "image folder {} is not a directory",
                image_folder.display()
            )));
        }

        Ok(InventoryConfig {
            image_folder,
            mount_root,
            boot_root: self.boot_root.clone(),
            kpartx_path: self.kpartx_path.clone(),
            command_timeout: self.command_timeout()?,
        })
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::config(format!("invalid {} '{}': {}", field, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_required_settings() {
        let config = BakeryConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = BakeryConfig {
            image_folder: Some("/srv/images".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = BakeryConfig {
            image_folder: Some(PathBuf::new()),
            mount_root: Some("/mnt/bakery".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let config = BakeryConfig {
            image_folder: Some(dir.path().to_path_buf()),
            mount_root: Some("/mnt/bakery".into()),
            command_timeout: "90s".into(),
            ..Default::default()
        };

        let inv = config.validate().unwrap();
        assert_eq!(inv.image_folder, dir.path());
        assert_eq!(inv.boot_root, PathBuf::from(DEFAULT_BOOT_ROOT));
        assert_eq!(inv.command_timeout, Duration::from_secs(90));

        let config = BakeryConfig {
            image_folder: Some(dir.path().join("missing")),
            mount_root: Some("/mnt/bakery".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_toml() {
        let config = BakeryConfig::from_toml(
            r#"
            image_folder = "/srv/images"
            mount_root = "/mnt/bakery"
            listen = "0.0.0.0:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.image_folder, Some(PathBuf::from("/srv/images")));
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.kpartx_path, PathBuf::from("kpartx"));
        assert_eq!(config.request_timeout().unwrap(), Duration::from_secs(1800));

        assert!(BakeryConfig::from_toml("listen = 5").is_err());
    }

    #[test]
    fn test_bad_timeout() {
        let config = BakeryConfig {
            command_timeout: "soon".into(),
            ..Default::default()
        };
        assert!(matches!(config.command_timeout(), Err(Error::Config(_))));
    }
}
