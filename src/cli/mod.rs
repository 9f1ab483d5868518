pub mod config;
pub mod waf;

pub use config::ConfigArgs;
pub use waf::WafArgs;

use crate::config::{Config, FirewallBuilder};
use crate::storage::{MemoryStore, StoreRegistry};
use crate::waf::Firewall;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Load the configuration (or defaults) and build a firewall from it.
///
/// A configured storage zone is backed by an in-memory store.
pub fn load_firewall(path: Option<&Path>) -> Result<(Config, Arc<Firewall>)> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let mut zones = StoreRegistry::new();
    if let Some(ref zone) = config.waf.storage_zone {
        zones.register(zone, Arc::new(MemoryStore::new()));
    }

    let fw = FirewallBuilder::new(config.waf.clone())
        .with_stores(zones)
        .build()
        .context("Failed to build firewall")?;

    Ok((config, fw))
}
