use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use anyhow::Result;

/// Whether matched rules are enforced.
///
/// Only `active` lets ACCEPT/DENY end evaluation. `simulate` evaluates and
/// records everything; `inactive` skips evaluation altogether.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WafMode {
    Active,
    #[default]
    Simulate,
    Inactive,
}

impl WafMode {
    pub fn is_enforcing(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for WafMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Simulate => write!(f, "simulate"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for WafMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "simulate" => Ok(Self::Simulate),
            "inactive" => Ok(Self::Inactive),
            _ => Err(anyhow::anyhow!(
                "Invalid WAF mode: '{}'. Valid values: active, simulate, inactive",
                s
            )),
        }
    }
}

/// Transport of the socket event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketProtocol {
    Tcp,
    #[default]
    Udp,
}

impl fmt::Display for SocketProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for SocketProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(anyhow::anyhow!("Invalid socket protocol: '{}'. Valid values: tcp, udp", s)),
        }
    }
}
