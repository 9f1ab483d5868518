use super::accessor::Accessor;
use super::actions::Action;
use super::collections::CollectionKey;
use super::operators::{Operator, RuleOperator};
use super::transforms::Transform;
use super::value::Value;
use super::Phase;
use crate::error::{Result, WafError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A single rule as loaded from a rule-set file.
///
/// A rule without targets matches unconditionally, which is how chain
/// terminators and bookkeeping rules (plain SETVAR/SCORE) are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub phase: Phase,
    #[serde(default)]
    pub targets: Vec<RuleTarget>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    #[serde(with = "operator_name")]
    pub operator: RuleOperator,
    #[serde(default)]
    pub pattern: Option<Value>,
    pub action: Action,
    /// Score delta applied by the SCORE action.
    #[serde(default)]
    pub score: u32,
    /// Number of following rules jumped over by the SKIP action.
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub setvar: Option<SetVar>,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTarget {
    pub collection: CollectionKey,
    #[serde(default)]
    pub accessor: Option<Accessor>,
    #[serde(default)]
    pub key: Option<String>,
}

impl RuleTarget {
    pub fn new(collection: CollectionKey) -> Self {
        Self {
            collection,
            accessor: None,
            key: None,
        }
    }

    pub fn with(collection: CollectionKey, accessor: Accessor, key: Option<&str>) -> Self {
        Self {
            collection,
            accessor: Some(accessor),
            key: key.map(str::to_string),
        }
    }

    pub fn key(collection: CollectionKey, key: &str) -> Self {
        Self {
            collection,
            accessor: None,
            key: Some(key.to_string()),
        }
    }
}

/// Variable write performed by SETVAR / SETTX.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetVar {
    pub key: String,
    #[serde(default)]
    pub value: Option<Value>,
    /// Add `value` (default 1) to the current numeric value instead of replacing it.
    #[serde(default)]
    pub increment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// On-disk layout of a rule-set file: `[[rules]]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSetFile {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSetFile {
    pub fn load(path: &Path) -> Result<Vec<Rule>> {
        let content = fs::read_to_string(path).map_err(|e| WafError::RuleSetLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file: RuleSetFile = toml::from_str(&content).map_err(|e| WafError::RuleSetLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(file.rules)
    }
}

mod operator_name {
    use super::RuleOperator;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(op: &RuleOperator, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&op.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RuleOperator, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Built-in rule set registered under the name `default`.
pub fn default_rules() -> Vec<Rule> {
    let rule = |id: &str, description: &str, operator: RuleOperator, pattern: Value| Rule {
        id: id.to_string(),
        description: description.to_string(),
        phase: Phase::Access,
        targets: vec![
            RuleTarget::new(CollectionKey::RequestArgs),
            RuleTarget::new(CollectionKey::Uri),
        ],
        transforms: vec![Transform::UriDecode, Transform::HtmlDecode],
        operator,
        pattern: Some(pattern),
        action: Action::Score,
        score: 5,
        skip: 0,
        setvar: None,
        severity: Severity::High,
    };

    let mut scanner = rule(
        "SCANNER-001",
        "Known vulnerability scanner user agent",
        RuleOperator::new(Operator::Pm),
        Value::from(vec!["sqlmap", "nikto", "nessus", "masscan", "nmap"]),
    );
    scanner.targets = vec![RuleTarget::new(CollectionKey::UserAgent)];
    scanner.transforms = vec![Transform::Lowercase];
    scanner.score = 3;
    scanner.severity = Severity::Medium;

    let mut sqli_comment = rule(
        "SQL-002",
        "SQL Injection - inline comment",
        RuleOperator::new(Operator::Regex),
        Value::from(r"(--|/\*|\*/|;\s*(drop|delete|insert|update)\b)"),
    );
    sqli_comment.targets = vec![RuleTarget::new(CollectionKey::RequestArgs)];

    let mut command = rule(
        "CMD-001",
        "Command Injection",
        RuleOperator::new(Operator::Regex),
        Value::from(r"(;|\||`|\$\(|\$\{)\s*(cat|ls|id|wget|curl|sh|bash)\b"),
    );
    command.targets = vec![RuleTarget::new(CollectionKey::RequestArgs)];
    command.severity = Severity::Critical;

    vec![
        scanner,
        rule(
            "SQL-001",
            "SQL Injection - UNION attack",
            RuleOperator::new(Operator::Regex),
            Value::from(r"union.+select"),
        ),
        sqli_comment,
        rule(
            "XSS-001",
            "XSS - Script tag",
            RuleOperator::new(Operator::Regex),
            Value::from(r"<script[^>]*>"),
        ),
        rule(
            "XSS-002",
            "XSS - Event handler",
            RuleOperator::new(Operator::Regex),
            Value::from(r"\bon(load|error|click|mouse\w+)\s*="),
        ),
        rule(
            "PATH-001",
            "Path Traversal",
            RuleOperator::new(Operator::Regex),
            Value::from(r"\.\.[\\/]"),
        ),
        command,
    ]
}
