//! Control-plane API interaction module
//!
//! # Module Structure
//!
//! - [`client`] - Endpoint, credentials and URL builders
//! - [`http`] - REST verbs over `reqwest` with status classification

pub mod client;
pub mod http;

pub use client::ControlPlaneClient;
pub use http::{format_remote_error, RemoteError};
