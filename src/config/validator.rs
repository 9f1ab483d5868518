use super::{Config, WafMode};
use crate::logging::sinks::SinkRegistry;
use anyhow::Result;

pub fn validate_config(config: &Config) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    let waf = &config.waf;

    if waf.mode == WafMode::Inactive {
        warnings.push("[!] WAF mode is 'inactive'. No rules will be evaluated.".to_string());
    }

    if waf.deny_status < 400 || waf.deny_status > 599 {
        warnings.push(format!(
            "[X] Invalid deny status: {}. Must be a 4xx or 5xx code",
            waf.deny_status
        ));
    }

    if waf.res_body_max_size == 0 {
        warnings.push("[!] res_body_max_size is 0. Response bodies will never be inspected.".to_string());
    }

    if waf.res_body_mime_types.is_empty() {
        warnings.push("[!] res_body_mime_types is empty. Response bodies will never be inspected.".to_string());
    }

    if let Some(ref dir) = waf.ruleset_dir {
        if !dir.exists() {
            warnings.push(format!("[X] Rule-set directory not found: {}", dir.display()));
        }
    }

    let active = waf.active_rulesets();
    if active.is_empty() {
        warnings.push("[!] No rule sets are active after applying ignore_ruleset.".to_string());
    }
    for name in &active {
        if name == "default" {
            continue;
        }
        match waf.ruleset_dir {
            Some(ref dir) if dir.join(format!("{}.toml", name)).exists() => {}
            Some(ref dir) => warnings.push(format!(
                "[X] Rule set '{}' not found in {}",
                name,
                dir.display()
            )),
            None => warnings.push(format!(
                "[X] Rule set '{}' requires ruleset_dir to be configured",
                name
            )),
        }
    }

    let sinks = SinkRegistry::with_builtin();
    for target in &waf.event_log.targets {
        if !sinks.contains(target) {
            warnings.push(format!(
                "[X] Unknown event log target: {}. Must be one of: {}",
                target,
                sinks.names().join(", ")
            ));
        }
    }

    if waf.event_log.targets.iter().any(|t| t == "socket") && waf.event_log.port == 0 {
        warnings.push("[X] Socket event log target requires a non-zero port".to_string());
    }

    if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
        warnings.push(format!(
            "[X] Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            config.logging.level
        ));
    }

    if !["json", "pretty", "plain"].contains(&config.logging.format.as_str()) {
        warnings.push(format!(
            "[X] Invalid log format: {}. Must be 'json', 'pretty' or 'plain'",
            config.logging.format
        ));
    }

    if waf.storage_zone.is_some() {
        warnings.push(
            "[i] storage_zone is set. The host must register the zone before the firewall is built".to_string()
        );
    }

    if waf.mode == WafMode::Simulate {
        warnings.push(
            "[*] Recommendation: Switch mode to 'active' once simulated matches look right".to_string()
        );
    }

    if config.logging.level == "debug" || config.logging.level == "trace" {
        warnings.push(
            "[*] Recommendation: Use 'info' or 'warn' log level in production".to_string()
        );
    }

    Ok(warnings)
}
