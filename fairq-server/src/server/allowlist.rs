//! IP allow-list for the metrics endpoint.
//!
//! Entries are exact addresses or CIDR ranges, v4 and v6. An empty list
//! denies every source. IPv4-mapped IPv6 clients are canonicalized before
//! matching, so `127.0.0.1` also covers `::ffff:127.0.0.1`.

use crate::core::error::{BrokerError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, PartialEq, Eq)]
enum IpRule {
    Exact(IpAddr),
    Cidr { base: IpAddr, prefix: u8 },
}

impl IpRule {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some((addr, prefix)) = raw.split_once('/') {
            let base: IpAddr = addr
                .parse()
                .map_err(|_| BrokerError::InvalidIpRule(raw.to_string()))?;
            let prefix: u8 = prefix
                .parse()
                .map_err(|_| BrokerError::InvalidIpRule(raw.to_string()))?;
            let max = match base {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if prefix > max {
                return Err(BrokerError::InvalidIpRule(raw.to_string()));
            }
            Ok(Self::Cidr { base, prefix })
        } else {
            let addr: IpAddr = raw
                .parse()
                .map_err(|_| BrokerError::InvalidIpRule(raw.to_string()))?;
            Ok(Self::Exact(addr))
        }
    }

    fn matches(&self, ip: IpAddr) -> bool {
        match self {
            Self::Exact(addr) => *addr == ip,
            Self::Cidr { base, prefix } => match (base, ip) {
                (IpAddr::V4(base), IpAddr::V4(ip)) => v4_prefix_match(*base, ip, *prefix),
                (IpAddr::V6(base), IpAddr::V6(ip)) => v6_prefix_match(*base, ip, *prefix),
                _ => false,
            },
        }
    }
}

fn v4_prefix_match(base: Ipv4Addr, ip: Ipv4Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - prefix);
    (u32::from(base) & mask) == (u32::from(ip) & mask)
}

fn v6_prefix_match(base: Ipv6Addr, ip: Ipv6Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let mask = u128::MAX << (128 - prefix);
    (u128::from(base) & mask) == (u128::from(ip) & mask)
}

/// Parsed allow-list. Deny-by-default: no rules, no access.
#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
    rules: Vec<IpRule>,
}

impl IpAllowList {
    pub fn parse(entries: &[String]) -> Result<Self> {
        let rules = entries
            .iter()
            .map(|entry| IpRule::parse(entry))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.rules.iter().any(|rule| rule.matches(ip))
    }
}
