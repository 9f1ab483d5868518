//! Default values for configuration options

use super::types::{SocketProtocol, WafMode};
use std::collections::BTreeSet;

// Firewall defaults
pub(super) fn default_mode() -> WafMode {
    WafMode::Simulate
}

pub(super) fn default_deny_status() -> u16 {
    403
}

pub(super) fn default_rulesets() -> Vec<String> {
    vec!["default".to_string()]
}

pub(super) fn default_allowed_content_types() -> BTreeSet<String> {
    ["application/json"].iter().map(|s| s.to_string()).collect()
}

// Response body inspection defaults
pub(super) fn default_res_body_max_size() -> u64 {
    1024 * 1024 // 1 MiB
}

pub(super) fn default_res_body_mime_types() -> BTreeSet<String> {
    ["text/plain", "text/html"].iter().map(|s| s.to_string()).collect()
}

// Regex defaults
pub(super) fn default_true() -> bool {
    true
}

// Event log defaults
pub(super) fn default_event_log_targets() -> Vec<String> {
    vec!["error".to_string()]
}

pub(super) fn default_event_log_path() -> String {
    "/var/log/fe-waf/events.log".to_string()
}

pub(super) fn default_event_log_host() -> String {
    "127.0.0.1".to_string()
}

pub(super) fn default_event_log_port() -> u16 {
    514
}

pub(super) fn default_event_log_protocol() -> SocketProtocol {
    SocketProtocol::Udp
}

pub(super) fn default_event_log_buffer_size() -> usize {
    4096
}

// Logging defaults
pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_log_format() -> String {
    "json".to_string()
}
