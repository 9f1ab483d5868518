use thiserror::Error;

/// Errors raised while configuring the firewall or evaluating a single rule.
///
/// Configuration variants are fatal and abort setup. Evaluation variants are
/// per-rule anomalies: the engine logs them and applies the fail-open or
/// fail-closed policy instead of aborting the request.
#[derive(Debug, Error)]
pub enum WafError {
    #[error("Unknown option: '{0}'")]
    UnknownOption(String),

    #[error("Invalid value for option '{option}': {reason}")]
    InvalidOptionValue { option: String, reason: String },

    #[error("Storage zone '{0}' does not exist")]
    StorageZoneMissing(String),

    #[error("Persistent write attempted without a configured storage zone")]
    StorageZoneUnset,

    #[error("Invalid CIDR '{cidr}': {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Invalid pattern set: {0}")]
    InvalidPatternSet(String),

    #[error("Collection {0} is not a map and cannot be narrowed")]
    UnsupportedCollection(String),

    #[error("Operator {operator} cannot use operand: {reason}")]
    BadOperand { operator: String, reason: String },

    #[error("Unknown rule set: '{0}'")]
    UnknownRuleSet(String),

    #[error("Failed to load rule set from {path}: {reason}")]
    RuleSetLoad { path: String, reason: String },

    #[error("Unknown event log target: '{0}'")]
    UnknownSink(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WafError {
    /// True for errors that must abort setup rather than a single rule.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnsupportedCollection(_)
                | Self::BadOperand { .. }
                | Self::InvalidRegex { .. }
                | Self::InvalidCidr { .. }
                | Self::InvalidPatternSet(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WafError>;
