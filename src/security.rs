use anyhow::{Result, bail};
use ipnet::IpNet;
use std::net::IpAddr;

/// Extracts the originating client IP from an `X-Forwarded-For` header.
/// The header reads "client, proxy1, proxy2, ..."; the leftmost entry is
/// the client.
#[must_use]
pub fn forwarded_client_ip(header: &str) -> Option<String> {
    header
        .split(',')
        .next()
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

enum AllowRule {
    Addr(IpAddr),
    Net(IpNet),
}

/// Which reverse proxies may hand connections to this relay. With no
/// entries configured, every peer is allowed.
pub struct ProxyAllowlist(Option<Vec<AllowRule>>);

impl ProxyAllowlist {
    /// Parses the configured entries, each an IP address or a CIDR subnet.
    pub fn parse(entries: Option<&[String]>) -> Result<Self> {
        let Some(entries) = entries else {
            return Ok(Self(None));
        };
        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Ok(addr) = entry.parse::<IpAddr>() {
                rules.push(AllowRule::Addr(addr));
            } else if let Ok(net) = entry.parse::<IpNet>() {
                rules.push(AllowRule::Net(net));
            } else {
                bail!("Invalid IP address or CIDR in allowed_proxy_ips: {entry}");
            }
        }
        Ok(Self(Some(rules)))
    }

    #[must_use]
    pub fn permits(&self, peer: IpAddr) -> bool {
        self.0.as_ref().is_none_or(|rules| {
            rules.iter().any(|rule| match rule {
                AllowRule::Addr(addr) => *addr == peer,
                AllowRule::Net(net) => net.contains(&peer),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_ip_takes_leftmost_entry() {
        assert_eq!(
            forwarded_client_ip("203.0.113.7, 10.0.0.1, 10.0.0.2"),
            Some("203.0.113.7".to_string())
        );
        assert_eq!(forwarded_client_ip("  203.0.113.7  "), Some("203.0.113.7".to_string()));
        assert_eq!(forwarded_client_ip(""), None);
    }

    #[test]
    fn empty_allowlist_permits_everyone() {
        let allowlist = ProxyAllowlist::parse(None).unwrap();
        assert!(allowlist.permits("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn allowlist_matches_addresses_and_subnets() {
        let entries = vec!["10.1.2.3".to_string(), "192.0.2.0/24".to_string()];
        let allowlist = ProxyAllowlist::parse(Some(&entries)).unwrap();

        assert!(allowlist.permits("10.1.2.3".parse().unwrap()));
        assert!(allowlist.permits("192.0.2.200".parse().unwrap()));
        assert!(!allowlist.permits("10.1.2.4".parse().unwrap()));
        assert!(!allowlist.permits("198.51.100.1".parse().unwrap()));
    }

    #[test]
    fn rejects_garbage_entries() {
        let entries = vec!["not-an-ip".to_string()];
        assert!(ProxyAllowlist::parse(Some(&entries)).is_err());
    }
}
