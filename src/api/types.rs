//! API request and response types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Summary of one bakeform.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct BakeformInfo {
    /// Bakeform name (image file name without `.img`).
    pub name: String,
    /// Path of the backing image.
    pub location: String,
    /// `unmounted`, `mounted` or `removed`.
    pub state: String,
    /// Current partition mount points, in partition order.
    pub mounted_on: Vec<String>,
    /// Boot partition copy under the NFS boot root.
    pub boot_location: String,
    /// Whether the boot copy exists.
    pub boot_copied: bool,
}

/// Inventory listing keyed by bakeform name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct BakeformMap(pub BTreeMap<String, BakeformInfo>);

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorResponse {
    /// Human-readable error text.
    pub error: String,
    /// Stable error code.
    pub code: String,
}
