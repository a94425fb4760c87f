//! Resource types
//!
//! Definitions are loaded from JSON files at compile time; each type also has
//! a synchronizer that speaks its REST API.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and caches resource definitions from embedded JSON
//! - [`autonomous_dw`] - Autonomous Data Warehouse synchronizer
//! - [`manifest`] - YAML manifests and JSON state files
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`:
//! - `database.json` - Autonomous databases

pub mod autonomous_dw;
pub mod manifest;
mod registry;

pub use autonomous_dw::{AdwDeclared, AdwSnapshot, AutonomousDataWarehouseSync, LicenseModel};
pub use manifest::{state_path_for, ManifestError, ResourceManifest, StateFile};
pub use registry::*;
