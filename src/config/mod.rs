pub mod defaults;
pub mod options;
pub mod parser;
pub mod types;
pub mod validator;

pub use options::{FirewallBuilder, OptionValue};
pub use types::{SocketProtocol, WafMode};

use anyhow::Result;
use defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub waf: WafConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Firewall settings. Mutated only while building a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafConfig {
    #[serde(default = "default_mode")]
    pub mode: WafMode,
    /// Running score at which a request is denied; 0 disables the check.
    #[serde(default)]
    pub score_threshold: u64,
    #[serde(default)]
    pub storage_zone: Option<String>,
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: BTreeSet<String>,
    #[serde(default = "default_res_body_max_size")]
    pub res_body_max_size: u64,
    #[serde(default = "default_res_body_mime_types")]
    pub res_body_mime_types: BTreeSet<String>,
    #[serde(default = "default_deny_status")]
    pub deny_status: u16,
    #[serde(default)]
    pub fail_closed: bool,
    #[serde(default)]
    pub regex: RegexOptions,
    /// Directory holding `<name>.toml` rule-set files.
    #[serde(default)]
    pub ruleset_dir: Option<PathBuf>,
    #[serde(default = "default_rulesets")]
    pub rulesets: Vec<String>,
    #[serde(default)]
    pub add_rulesets: Vec<String>,
    #[serde(default)]
    pub ignore_rulesets: Vec<String>,
    #[serde(default)]
    pub ignore_rules: BTreeSet<String>,
    #[serde(default)]
    pub event_log: EventLogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexOptions {
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    #[serde(default)]
    pub multi_line: bool,
    #[serde(default)]
    pub dot_matches_new_line: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Sink names, resolved through the sink registry.
    #[serde(default = "default_event_log_targets")]
    pub targets: Vec<String>,
    #[serde(default = "default_event_log_path")]
    pub path: String,
    #[serde(default = "default_event_log_host")]
    pub host: String,
    #[serde(default = "default_event_log_port")]
    pub port: u16,
    #[serde(default = "default_event_log_protocol")]
    pub protocol: SocketProtocol,
    /// Buffered bytes that trigger a flush.
    #[serde(default = "default_event_log_buffer_size")]
    pub buffer_size: usize,
    /// Periodic flush interval in seconds; 0 disables the flush thread.
    #[serde(default)]
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            score_threshold: 0,
            storage_zone: None,
            allowed_content_types: default_allowed_content_types(),
            res_body_max_size: default_res_body_max_size(),
            res_body_mime_types: default_res_body_mime_types(),
            deny_status: default_deny_status(),
            fail_closed: false,
            regex: RegexOptions::default(),
            ruleset_dir: None,
            rulesets: default_rulesets(),
            add_rulesets: Vec::new(),
            ignore_rulesets: Vec::new(),
            ignore_rules: BTreeSet::new(),
            event_log: EventLogConfig::default(),
        }
    }
}

impl Default for RegexOptions {
    fn default() -> Self {
        Self {
            case_insensitive: default_true(),
            multi_line: false,
            dot_matches_new_line: false,
        }
    }
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            targets: default_event_log_targets(),
            path: default_event_log_path(),
            host: default_event_log_host(),
            port: default_event_log_port(),
            protocol: default_event_log_protocol(),
            buffer_size: default_event_log_buffer_size(),
            flush_interval_secs: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WafConfig {
    /// Rule-set names in effect: the base list plus additions, minus ignores.
    pub fn active_rulesets(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.rulesets.iter().chain(self.add_rulesets.iter()) {
            if !self.ignore_rulesets.contains(name) && !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        parser::parse_config(path)
    }

    pub fn validate(&self) -> Result<Vec<String>> {
        validator::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WafConfig::default();
        assert_eq!(config.mode, WafMode::Simulate);
        assert_eq!(config.score_threshold, 0);
        assert_eq!(config.deny_status, 403);
        assert!(config.regex.case_insensitive);
        assert!(config.res_body_mime_types.contains("text/html"));
        assert_eq!(config.event_log.targets, vec!["error".to_string()]);
    }

    #[test]
    fn test_active_rulesets() {
        let mut config = WafConfig::default();
        config.add_rulesets = vec!["local".to_string(), "default".to_string()];
        assert_eq!(config.active_rulesets(), vec!["default", "local"]);

        config.ignore_rulesets = vec!["default".to_string()];
        assert_eq!(config.active_rulesets(), vec!["local"]);
    }
}
