//! List command implementation.

use clap::Args;
use bakery::api::state::list_to_map;
use bakery::config::BakeryConfig;
use bakery::error::Error;
use bakery::BakeformInventory;

/// List all bakeforms.
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Show detailed output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListCmd {
    /// Execute the list command.
    pub fn run(&self, config: &BakeryConfig) -> bakery::Result<()> {
        let inventory = BakeformInventory::open(&config.validate()?)?;
        let map = list_to_map(&inventory.list());

        if self.json {
            let json = serde_json::to_string_pretty(&map)
                .map_err(|e| Error::storage("serialize inventory", e))?;
            println!("{}", json);
            return Ok(());
        }

        if map.0.is_empty() {
            println!("No bakeforms found");
            return Ok(());
        }

        println!("{:<30} {:<10} {:<6} {:<40}", "NAME", "STATE", "BOOT", "IMAGE");
        println!("{}", "-".repeat(88));

        for (name, info) in &map.0 {
            println!(
                "{:<30} {:<10} {:<6} {:<40}",
                truncate(name, 28),
                info.state,
                if info.boot_copied { "yes" } else { "no" },
                truncate(&info.location, 38),
            );

            if self.verbose {
                println!("  Boot copy: {}", info.boot_location);
                for mount in &info.mounted_on {
                    println!("  Mounted: {}", mount);
                }
                println!();
            }
        }

        Ok(())
    }
}

/// Truncate a string to max length, adding "..." if needed.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
