pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod storage;
pub mod waf;

pub use config::{Config, FirewallBuilder, WafConfig, WafMode};
pub use error::{Result, WafError};
pub use waf::{Decision, Firewall, SharedFirewall, Transaction};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
