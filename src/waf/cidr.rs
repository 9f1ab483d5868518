use crate::error::{Result, WafError};
use ipnetwork::IpNetwork;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::debug;

/// Numeric bounds of a parsed CIDR range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrBounds {
    v6: bool,
    lower: u128,
    upper: u128,
}

impl CidrBounds {
    pub fn parse(cidr: &str) -> Result<Self> {
        let network = IpNetwork::from_str(cidr.trim()).map_err(|e| WafError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: e.to_string(),
        })?;

        let (v6, bits, addr) = match network {
            IpNetwork::V4(net) => (false, 32u32, u32::from(net.ip()) as u128),
            IpNetwork::V6(net) => (true, 128u32, u128::from(net.ip())),
        };

        let host_bits = bits - network.prefix() as u32;
        let host_mask: u128 = if host_bits == 0 {
            0
        } else if host_bits >= 128 {
            u128::MAX
        } else {
            (1u128 << host_bits) - 1
        };

        Ok(Self {
            v6,
            lower: addr & !host_mask,
            upper: addr | host_mask,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let (v6, n) = match ip {
            IpAddr::V4(v4) => (false, u32::from(v4) as u128),
            IpAddr::V6(v6) => (true, u128::from(v6)),
        };
        v6 == self.v6 && n >= self.lower && n <= self.upper
    }

    pub fn lower(&self) -> u128 {
        self.lower
    }

    pub fn upper(&self) -> u128 {
        self.upper
    }
}

/// CIDR strings parsed once and cached for the life of the firewall.
#[derive(Debug, Default)]
pub struct CidrCache {
    entries: RwLock<HashMap<String, CidrBounds>>,
}

impl CidrCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and cache a CIDR string. Returns `true` if it was parsed now,
    /// `false` if it was already cached.
    pub fn register(&self, cidr: &str) -> Result<bool> {
        if self.entries.read().contains_key(cidr) {
            return Ok(false);
        }

        let bounds = CidrBounds::parse(cidr)?;
        let mut entries = self.entries.write();
        if entries.contains_key(cidr) {
            return Ok(false);
        }
        debug!("Registered CIDR {} ({:#x}..={:#x})", cidr, bounds.lower, bounds.upper);
        entries.insert(cidr.to_string(), bounds);
        Ok(true)
    }

    pub fn bounds(&self, cidr: &str) -> Result<CidrBounds> {
        if let Some(bounds) = self.entries.read().get(cidr) {
            return Ok(*bounds);
        }
        self.register(cidr)?;
        self.entries
            .read()
            .get(cidr)
            .copied()
            .ok_or_else(|| WafError::InvalidCidr {
                cidr: cidr.to_string(),
                reason: "not cached".to_string(),
            })
    }

    /// Whether `ip` falls in any of `cidrs`. A subject that is not an IP
    /// address never matches.
    pub fn matches<S: AsRef<str>>(&self, ip: &str, cidrs: &[S]) -> Result<bool> {
        let addr = match IpAddr::from_str(ip.trim()) {
            Ok(addr) => addr,
            Err(_) => return Ok(false),
        };

        for cidr in cidrs {
            if self.bounds(cidr.as_ref())?.contains(addr) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
