//! API server state.

use std::sync::Arc;

use crate::api::types::{BakeformInfo, BakeformMap};
use crate::bakeform::Bakeform;
use crate::inventory::{BakeformInventory, BakeformList};

/// Shared API server state.
pub struct ApiState {
    inventory: Arc<BakeformInventory>,
}

impl ApiState {
    /// Create state serving `inventory`.
    pub fn new(inventory: Arc<BakeformInventory>) -> Self {
        Self { inventory }
    }

    /// The served inventory.
    pub fn inventory(&self) -> &Arc<BakeformInventory> {
        &self.inventory
    }
}

// ============================================================================
// Type Conversions
// ============================================================================

/// Convert a Bakeform to its API summary.
pub fn bakeform_to_info(bakeform: &Bakeform) -> BakeformInfo {
    BakeformInfo {
        name: bakeform.name().to_string(),
        location: bakeform.location().to_string_lossy().to_string(),
        state: bakeform.state().to_string(),
        mounted_on: bakeform
            .mounted_on()
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
        boot_location: bakeform.boot_location().to_string_lossy().to_string(),
        boot_copied: bakeform.has_boot_copy(),
    }
}

/// Convert an inventory snapshot to the API listing.
pub fn list_to_map(list: &BakeformList) -> BakeformMap {
    BakeformMap(
        list.iter()
            .map(|(name, bakeform)| (name.clone(), bakeform_to_info(bakeform)))
            .collect(),
    )
}
