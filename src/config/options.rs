//! Option registry and firewall snapshot builder.
//!
//! Options are applied to a [`WafConfig`] owned by the builder and validated
//! eagerly. Changes to the rule-set lists only take effect when a new snapshot
//! is built.

use super::{SocketProtocol, WafConfig, WafMode};
use crate::error::{Result, WafError};
use crate::logging::sinks::{EventLogger, SinkRegistry};
use crate::storage::StoreRegistry;
use crate::waf::cidr::CidrCache;
use crate::waf::collections::normalize_mime;
use crate::waf::operators::{Matchers, Operator};
use crate::waf::pm::PatternCache;
use crate::waf::rules::{default_rules, Rule, RuleSetFile};
use crate::waf::Firewall;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Value passed to [`FirewallBuilder::set_option`].
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for OptionValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<Vec<&str>> for OptionValue {
    fn from(items: Vec<&str>) -> Self {
        Self::List(items.into_iter().map(str::to_string).collect())
    }
}

fn invalid(option: &str, reason: impl Into<String>) -> WafError {
    WafError::InvalidOptionValue {
        option: option.to_string(),
        reason: reason.into(),
    }
}

impl OptionValue {
    fn into_string(self, option: &str) -> Result<String> {
        match self {
            Self::Str(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Self::Str(_) => Err(invalid(option, "value is empty")),
            other => Err(invalid(option, format!("expected a string, got {:?}", other))),
        }
    }

    fn into_u64(self, option: &str) -> Result<u64> {
        match self {
            Self::Int(n) if n >= 0 => Ok(n as u64),
            Self::Int(n) => Err(invalid(option, format!("{} is negative", n))),
            Self::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| invalid(option, format!("'{}' is not a non-negative integer", s))),
            other => Err(invalid(option, format!("expected an integer, got {:?}", other))),
        }
    }

    fn into_bool(self, option: &str) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(b),
            Self::Str(s) => match s.trim().to_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(true),
                "false" | "off" | "no" | "0" => Ok(false),
                _ => Err(invalid(option, format!("'{}' is not a boolean", s))),
            },
            other => Err(invalid(option, format!("expected a boolean, got {:?}", other))),
        }
    }

    /// Lists pass through; a single string is a one-element list.
    fn into_list(self, option: &str) -> Result<Vec<String>> {
        match self {
            Self::List(items) => Ok(items),
            Self::Str(s) => Ok(vec![s]),
            other => Err(invalid(option, format!("expected a list, got {:?}", other))),
        }
    }
}

/// Builds immutable [`Firewall`] snapshots.
pub struct FirewallBuilder {
    config: WafConfig,
    stores: StoreRegistry,
    sinks: SinkRegistry,
    sources: BTreeMap<String, Vec<Rule>>,
    cidrs: Arc<CidrCache>,
    merge_required: bool,
}

impl FirewallBuilder {
    pub fn new(config: WafConfig) -> Self {
        let mut sources = BTreeMap::new();
        sources.insert("default".to_string(), default_rules());

        Self {
            config,
            stores: StoreRegistry::new(),
            sinks: SinkRegistry::with_builtin(),
            sources,
            cidrs: Arc::new(CidrCache::new()),
            merge_required: false,
        }
    }

    pub(crate) fn from_snapshot(fw: &Firewall) -> Self {
        Self {
            config: fw.config.clone(),
            stores: fw.stores.clone(),
            sinks: fw.event_logger.registry().clone(),
            sources: fw.sources.clone(),
            cidrs: Arc::clone(&fw.matchers.cidrs),
            merge_required: false,
        }
    }

    pub fn with_stores(mut self, stores: StoreRegistry) -> Self {
        self.stores = stores;
        self
    }

    pub fn with_sinks(mut self, sinks: SinkRegistry) -> Self {
        self.sinks = sinks;
        self
    }

    /// Make a rule set available under `name` without loading it from disk.
    pub fn add_ruleset_source(mut self, name: &str, rules: Vec<Rule>) -> Self {
        self.sources.insert(name.to_string(), rules);
        self
    }

    pub fn config(&self) -> &WafConfig {
        &self.config
    }

    /// Whether rule-set lists changed since this builder was created.
    pub fn merge_required(&self) -> bool {
        self.merge_required
    }

    pub fn set_option(&mut self, name: &str, value: impl Into<OptionValue>) -> Result<()> {
        let value = value.into();
        debug!("Setting option {} = {:?}", name, value);

        match name {
            "add_ruleset" => {
                self.config.add_rulesets.extend(value.into_list(name)?);
                self.merge_required = true;
            }
            "ignore_ruleset" => {
                self.config.ignore_rulesets.extend(value.into_list(name)?);
                self.merge_required = true;
            }
            "allowed_content_types" => {
                for item in value.into_list(name)? {
                    self.config.allowed_content_types.insert(normalize_mime(&item));
                }
            }
            "res_body_mime_types" => {
                for item in value.into_list(name)? {
                    self.config.res_body_mime_types.insert(normalize_mime(&item));
                }
            }
            "ignore_rule" => {
                self.config.ignore_rules.extend(value.into_list(name)?);
            }
            "mode" => {
                let mode = value.into_string(name)?;
                self.config.mode = mode
                    .parse::<WafMode>()
                    .map_err(|e| invalid(name, e.to_string()))?;
            }
            "score_threshold" => {
                self.config.score_threshold = value.into_u64(name)?;
            }
            "storage_zone" => {
                let zone = value.into_string(name)?;
                if !self.stores.contains(&zone) {
                    return Err(WafError::StorageZoneMissing(zone));
                }
                self.config.storage_zone = Some(zone);
            }
            "res_body_max_size" => {
                self.config.res_body_max_size = value.into_u64(name)?;
            }
            "deny_status" => {
                let status = value.into_u64(name)?;
                if !(100..=599).contains(&status) {
                    return Err(invalid(name, format!("{} is not an HTTP status", status)));
                }
                self.config.deny_status = status as u16;
            }
            "fail_closed" => {
                self.config.fail_closed = value.into_bool(name)?;
            }
            "regex_case_insensitive" => {
                self.config.regex.case_insensitive = value.into_bool(name)?;
            }
            "event_log_target" => {
                let targets = value.into_list(name)?;
                if let Some(unknown) = targets.iter().find(|t| !self.sinks.contains(t)) {
                    return Err(WafError::UnknownSink(unknown.clone()));
                }
                self.config.event_log.targets = targets;
            }
            "event_log_path" => {
                self.config.event_log.path = value.into_string(name)?;
            }
            "event_log_host" => {
                self.config.event_log.host = value.into_string(name)?;
            }
            "event_log_port" => {
                let port = value.into_u64(name)?;
                if port == 0 || port > u64::from(u16::MAX) {
                    return Err(invalid(name, format!("{} is not a port", port)));
                }
                self.config.event_log.port = port as u16;
            }
            "event_log_protocol" => {
                let protocol = value.into_string(name)?;
                self.config.event_log.protocol = protocol
                    .parse::<SocketProtocol>()
                    .map_err(|e| invalid(name, e.to_string()))?;
            }
            "event_log_buffer_size" => {
                self.config.event_log.buffer_size = value.into_u64(name)? as usize;
            }
            "event_log_flush_interval" => {
                self.config.event_log.flush_interval_secs = value.into_u64(name)?;
            }
            _ => return Err(WafError::UnknownOption(name.to_string())),
        }

        Ok(())
    }

    /// Parse and cache a CIDR range. Returns `true` if it was not cached yet.
    pub fn register_cidr(&self, cidr: &str) -> Result<bool> {
        self.cidrs.register(cidr)
    }

    /// Merge the active rule sets and freeze the configuration.
    pub fn build(self) -> Result<Arc<Firewall>> {
        let FirewallBuilder {
            config,
            stores,
            sinks,
            mut sources,
            cidrs,
            merge_required,
        } = self;

        let store = match config.storage_zone {
            Some(ref zone) => Some(
                stores
                    .get(zone)
                    .ok_or_else(|| WafError::StorageZoneMissing(zone.clone()))?,
            ),
            None => None,
        };

        if merge_required {
            debug!("Rule-set lists changed, merging rule sets");
        }

        let mut rules = Vec::new();
        for name in config.active_rulesets() {
            if !sources.contains_key(&name) {
                let loaded = load_ruleset(config.ruleset_dir.as_deref(), &name)?;
                sources.insert(name.clone(), loaded);
            }
            let Some(set) = sources.get(&name) else {
                continue;
            };
            rules.extend(
                set.iter()
                    .filter(|rule| !config.ignore_rules.contains(&rule.id))
                    .cloned(),
            );
        }

        for rule in rules.iter().filter(|r| r.operator.operator == Operator::CidrMatch) {
            let Some(ref pattern) = rule.pattern else {
                continue;
            };
            for cidr in pattern.strings() {
                if let Err(e) = cidrs.register(&cidr) {
                    warn!("Rule {} has an invalid CIDR: {}", rule.id, e);
                }
            }
        }

        let mut patterns = PatternCache::new();
        for (slot, rule) in rules.iter().enumerate() {
            if rule.operator.operator != Operator::Pm {
                continue;
            }
            let Some(ref pattern) = rule.pattern else {
                continue;
            };
            if let Err(e) = patterns.insert(slot, pattern) {
                warn!("Rule {} has an invalid pattern set: {}", rule.id, e);
            }
        }

        let event_logger = EventLogger::new(config.event_log.clone(), sinks)?;
        let matchers = Matchers::with_cidrs(config.regex.clone(), cidrs).with_patterns(patterns);

        info!(
            "Firewall ready: mode={}, rules={}, score_threshold={}",
            config.mode,
            rules.len(),
            config.score_threshold
        );

        Ok(Arc::new(Firewall {
            config,
            rules,
            matchers,
            store,
            stores,
            sources,
            event_logger,
        }))
    }
}

fn load_ruleset(dir: Option<&Path>, name: &str) -> Result<Vec<Rule>> {
    let dir = dir.ok_or_else(|| WafError::UnknownRuleSet(name.to_string()))?;
    let path = dir.join(format!("{}.toml", name));
    if !path.exists() {
        return Err(WafError::UnknownRuleSet(name.to_string()));
    }
    let rules = RuleSetFile::load(&path)?;
    info!("Loaded {} rules from {}", rules.len(), path.display());
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::io::Write;

    #[test]
    fn test_unknown_option() {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        let err = builder.set_option("no_such_option", "x").unwrap_err();
        assert!(matches!(err, WafError::UnknownOption(_)));
    }

    #[test]
    fn test_scalar_options_validate() {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        builder.set_option("mode", "active").unwrap();
        builder.set_option("score_threshold", 10i64).unwrap();
        builder.set_option("fail_closed", "on").unwrap();
        builder.set_option("event_log_protocol", "tcp").unwrap();

        assert_eq!(builder.config().mode, WafMode::Active);
        assert_eq!(builder.config().score_threshold, 10);
        assert!(builder.config().fail_closed);
        assert_eq!(builder.config().event_log.protocol, SocketProtocol::Tcp);

        assert!(builder.set_option("mode", "block").is_err());
        assert!(builder.set_option("score_threshold", -1i64).is_err());
        assert!(builder.set_option("deny_status", 42i64).is_err());
        assert!(builder.set_option("event_log_port", 70000i64).is_err());
        assert!(builder.set_option("fail_closed", 1i64).is_err());
    }

    #[test]
    fn test_set_options_add_members() {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        builder.set_option("res_body_mime_types", vec!["Application/JSON", "text/xml"]).unwrap();
        builder.set_option("ignore_rule", "SQL-001").unwrap();
        builder.set_option("ignore_rule", "XSS-001").unwrap();

        let config = builder.config();
        assert!(config.res_body_mime_types.contains("application/json"));
        assert!(config.res_body_mime_types.contains("text/html"));
        assert_eq!(config.ignore_rules.len(), 2);
    }

    #[test]
    fn test_list_options_set_merge_required() {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        assert!(!builder.merge_required());
        builder.set_option("ignore_ruleset", "default").unwrap();
        assert!(builder.merge_required());

        let fw = builder.build().unwrap();
        assert!(fw.rules().is_empty());
    }

    #[test]
    fn test_storage_zone_must_exist() {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        let err = builder.set_option("storage_zone", "waf").unwrap_err();
        assert!(matches!(err, WafError::StorageZoneMissing(ref z) if z == "waf"));

        let mut zones = StoreRegistry::new();
        zones.register("waf", Arc::new(MemoryStore::new()));
        let mut builder = FirewallBuilder::new(WafConfig::default()).with_stores(zones);
        builder.set_option("storage_zone", "waf").unwrap();
        assert!(builder.build().unwrap().store().is_some());
    }

    #[test]
    fn test_zone_from_config_checked_at_build() {
        let mut config = WafConfig::default();
        config.storage_zone = Some("missing".to_string());
        let err = FirewallBuilder::new(config).build().unwrap_err();
        assert!(matches!(err, WafError::StorageZoneMissing(_)));
    }

    #[test]
    fn test_unknown_sink_rejected() {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        let err = builder.set_option("event_log_target", "kafka").unwrap_err();
        assert!(matches!(err, WafError::UnknownSink(_)));
        builder.set_option("event_log_target", vec!["error", "file"]).unwrap();
    }

    #[test]
    fn test_register_cidr_once() {
        let builder = FirewallBuilder::new(WafConfig::default());
        assert!(builder.register_cidr("10.0.0.0/8").unwrap());
        assert!(!builder.register_cidr("10.0.0.0/8").unwrap());
        assert!(builder.register_cidr("not-a-cidr").is_err());
    }

    #[test]
    fn test_ignored_rules_dropped() {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        builder.set_option("ignore_rule", "SQL-001").unwrap();
        let fw = builder.build().unwrap();
        assert!(!fw.rules().is_empty());
        assert!(fw.rules().iter().all(|r| r.id != "SQL-001"));
    }

    #[test]
    fn test_ruleset_loaded_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("local.toml")).unwrap();
        file.write_all(
            br#"
[[rules]]
id = "LOCAL-001"
phase = "access"
targets = [{ collection = "URI" }]
operator = "REGEX"
pattern = "^/admin"
action = "DENY"
"#,
        )
        .unwrap();

        let mut config = WafConfig::default();
        config.ruleset_dir = Some(dir.path().to_path_buf());
        let mut builder = FirewallBuilder::new(config);
        builder.set_option("ignore_ruleset", "default").unwrap();
        builder.set_option("add_ruleset", "local").unwrap();

        let fw = builder.build().unwrap();
        assert_eq!(fw.rules().len(), 1);
        assert_eq!(fw.rules()[0].id, "LOCAL-001");
    }

    #[test]
    fn test_unknown_ruleset_fails_build() {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        builder.set_option("add_ruleset", "missing").unwrap();
        assert!(matches!(builder.build().unwrap_err(), WafError::UnknownRuleSet(_)));
    }

    #[test]
    fn test_reconfigure_keeps_settings() {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        builder.set_option("mode", "active").unwrap();
        let fw = builder.build().unwrap();

        let mut next = fw.reconfigure();
        assert_eq!(next.config().mode, WafMode::Active);
        next.set_option("score_threshold", 5i64).unwrap();
        let next = next.build().unwrap();

        assert_eq!(fw.config().score_threshold, 0);
        assert_eq!(next.config().score_threshold, 5);
        assert_eq!(next.rules().len(), fw.rules().len());
    }
}
