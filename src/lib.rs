//! bakery - disk image inventory for network-booted machines.
//!
//! A *bakeform* is a raw disk image whose boot partition is exported over NFS
//! to diskless clients. This crate discovers the images in a folder, maps and
//! mounts their partitions, copies each boot partition into the shared boot
//! root exactly once, and serves upload/delete/list over HTTP.
//!
//! The NFS export table is regenerated separately by [`exports::ExportRegenerator`]
//! from the current boot-client list.

pub mod api;
pub mod backend;
pub mod bakeform;
pub mod config;
pub mod error;
pub mod exports;
pub mod inventory;
pub mod mount;
pub mod partition;
pub mod process;

#[cfg(test)]
pub(crate) mod testing;

pub use bakeform::{Bakeform, Host};
pub use error::{Error, Result};
pub use inventory::{BakeformInventory, BakeformList};

/// Crate version, reported by the CLI and the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
