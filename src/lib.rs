//! cloudsync - reconcile declared resources against a cloud control plane
//!
//! # Module Structure
//!
//! - [`engine`] - Retry, state waiting and the lifecycle driver
//! - [`remote`] - Control-plane HTTP client
//! - [`resource`] - Resource definitions, synchronizers and manifests
//! - [`config`] - Persistent configuration

pub mod config;
pub mod engine;
pub mod remote;
pub mod resource;
