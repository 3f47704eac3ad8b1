//! CLI command implementations.

pub mod exports;
pub mod list;
pub mod serve;

use bakery::config::BakeryConfig;
use clap::Args;
use std::path::PathBuf;

/// Settings shared by every command.
///
/// Each flag falls back to its environment variable, then to the config file,
/// then to the built-in default.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// TOML config file.
    #[arg(long, env = "BAKERY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Folder containing `*.img` files.
    #[arg(long, env = "IMAGE_FOLDER", global = true)]
    pub image_folder: Option<PathBuf>,

    /// Directory under which image partitions are mounted.
    #[arg(long, env = "IMAGE_MOUNT_ROOT", global = true)]
    pub mount_root: Option<PathBuf>,

    /// NFS boot tree receiving boot partition copies.
    #[arg(long, env = "NFS_BOOT_ROOT", global = true)]
    pub boot_root: Option<PathBuf>,

    /// kpartx binary.
    #[arg(long, env = "KPARTX_PATH", global = true)]
    pub kpartx_path: Option<PathBuf>,

    /// NFS export table.
    #[arg(long, env = "NFS_EXPORTS_PATH", global = true)]
    pub exports_path: Option<PathBuf>,

    /// Bound on each external command (e.g. "90s").
    #[arg(long, env = "BAKERY_COMMAND_TIMEOUT", global = true)]
    pub command_timeout: Option<String>,
}

impl ConfigArgs {
    /// Load the config file and apply flag/environment overrides.
    pub fn resolve(&self) -> bakery::Result<BakeryConfig> {
        let mut config = BakeryConfig::load(self.config.as_deref())?;

        if let Some(v) = &self.image_folder {
            config.image_folder = Some(v.clone());
        }
        if let Some(v) = &self.mount_root {
            config.mount_root = Some(v.clone());
        }
        if let Some(v) = &self.boot_root {
            config.boot_root = v.clone();
        }
        if let Some(v) = &self.kpartx_path {
            config.kpartx_path = v.clone();
        }
        if let Some(v) = &self.exports_path {
            config.exports_path = v.clone();
        }
        if let Some(v) = &self.command_timeout {
            config.command_timeout = v.clone();
        }

        Ok(config)
    }
}
