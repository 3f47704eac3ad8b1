//! Export table regeneration command.

use clap::Args;
use std::path::PathBuf;

use bakery::config::BakeryConfig;
use bakery::exports::{reload_exports, ExportRegenerator, JsonClientFile};

/// Rewrite the NFS export table.
#[derive(Args, Debug)]
pub struct RegenExportsCmd {
    /// JSON array of boot clients (`[{"name": ..., "root_location": ...}]`).
    #[arg(long, env = "BAKERY_CLIENTS_FILE")]
    pub clients: PathBuf,

    /// Run `exportfs -ra` afterwards.
    #[arg(long)]
    pub reload: bool,
}

impl RegenExportsCmd {
    /// Execute the regen-exports command.
    pub fn run(&self, config: &BakeryConfig) -> bakery::Result<()> {
        let regenerator = ExportRegenerator::new(&config.exports_path);
        regenerator.regenerate(&JsonClientFile::new(&self.clients))?;
        println!("Wrote {}", regenerator.path().display());

        if self.reload {
            reload_exports(config.command_timeout()?)?;
            println!("Reloaded NFS exports");
        }
        Ok(())
    }
}
