//! Terraform provider for VMware Cloud Director
//!
//! Manages catalog items (OVA uploads) and the firewall and NAT rule lists of
//! vApp networks.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod import;
pub mod lock;
pub mod provider;
pub mod resolve;
pub mod resources;
pub mod rules;
pub mod schema;
pub mod types;
