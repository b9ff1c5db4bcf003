//! CIDR-based peer admission filter.

use ipnet::IpNet;
use std::net::IpAddr;

/// Error from parsing a restriction list entry.
#[derive(Debug, thiserror::Error)]
#[error("invalid CIDR mask {mask:?}")]
pub struct InvalidMask {
    mask: String,
    #[source]
    source: ipnet::AddrParseError,
}

/// Set of address ranges peer connections are restricted to.
///
/// An empty set places no restriction at all.
#[derive(Debug, Clone, Default)]
pub struct NetRestrict {
    nets: Vec<IpNet>,
}

impl NetRestrict {
    /// Parse a comma-separated CIDR list.
    pub fn parse(list: &str) -> Result<Self, InvalidMask> {
        let mut nets = Vec::new();
        for mask in list.split(',') {
            let mask = mask.trim();
            if mask.is_empty() {
                continue;
            }
            nets.push(mask.parse().map_err(|source| InvalidMask {
                mask: mask.to_string(),
                source,
            })?);
        }
        Ok(Self { nets })
    }

    /// Whether `addr` falls inside any allowed range.
    pub fn permits(&self, addr: IpAddr) -> bool {
        self.nets.is_empty() || self.nets.iter().any(|net| net.contains(&addr))
    }

    /// Whether any ranges are configured.
    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_permits_everything() {
        let restrict = NetRestrict::parse("").unwrap();
        assert!(restrict.is_empty());
        assert!(restrict.permits("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn permits_only_listed_ranges() {
        let restrict = NetRestrict::parse("10.0.0.0/8, 192.168.1.0/24").unwrap();
        assert!(restrict.permits("10.1.2.3".parse().unwrap()));
        assert!(restrict.permits("192.168.1.77".parse().unwrap()));
        assert!(!restrict.permits("192.168.2.1".parse().unwrap()));
        assert!(!restrict.permits("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn supports_ipv6_ranges() {
        let restrict = NetRestrict::parse("fd00::/8").unwrap();
        assert!(restrict.permits("fd12::1".parse().unwrap()));
        assert!(!restrict.permits("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn rejects_malformed_masks() {
        assert!(NetRestrict::parse("10.0.0.0/8,not-a-cidr").is_err());
        assert!(NetRestrict::parse("10.0.0.1").is_err());
    }
}
