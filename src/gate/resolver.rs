use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use http::HeaderMap;
use ipnet::IpNet;
use tracing::warn;

use crate::config::settings::GateConfig;
use crate::geo::is_private_address;

/// Derives the client address for a request.
///
/// Forwarded headers are only honored when the peer socket address falls
/// inside a configured trusted-proxy range; otherwise the peer address is
/// taken as-is. With no peer at all the resolver falls back to loopback.
pub struct ClientAddrResolver {
    trusted_proxies: Vec<IpNet>,
    header_order: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedClient {
    pub address: IpAddr,
    pub routable: bool,
}

impl ClientAddrResolver {
    pub fn from_config(config: &GateConfig) -> Self {
        let trusted_proxies = config
            .trusted_proxies
            .iter()
            .filter_map(|cidr| match cidr.parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(_) => {
                    warn!(cidr = %cidr, "Ignoring unparseable trusted-proxy range");
                    None
                }
            })
            .collect();

        Self {
            trusted_proxies,
            header_order: config.proxy_headers.clone(),
        }
    }

    pub fn resolve(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> ResolvedClient {
        let address = match peer {
            Some(peer_addr) => {
                if self.is_trusted_proxy(&peer_addr) {
                    self.from_headers(headers).unwrap_or(peer_addr)
                } else {
                    peer_addr
                }
            }
            None => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };

        ResolvedClient {
            address,
            routable: !is_private_address(&address),
        }
    }

    fn is_trusted_proxy(&self, peer: &IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(peer))
    }

    /// Walk the configured header order; the first parseable address wins.
    /// For comma-separated lists (x-forwarded-for) the left-most entry is
    /// the original client.
    fn from_headers(&self, headers: &HeaderMap) -> Option<IpAddr> {
        for name in &self.header_order {
            let Some(value) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            let candidate = value.split(',').next().unwrap_or("").trim();
            if let Ok(addr) = IpAddr::from_str(candidate) {
                return Some(addr);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn resolver(trusted: &[&str]) -> ClientAddrResolver {
        ClientAddrResolver::from_config(&GateConfig {
            block_cache_ttl_secs: 300,
            fail_open: false,
            trusted_proxies: trusted.iter().map(|s| s.to_string()).collect(),
            proxy_headers: vec!["x-forwarded-for".to_string(), "x-real-ip".to_string()],
        })
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::header::HeaderName::from_str(name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn untrusted_peer_headers_are_ignored() {
        let r = resolver(&[]);
        let peer: IpAddr = "203.0.113.7".parse().unwrap();
        let resolved = r.resolve(Some(peer), &headers(&[("x-forwarded-for", "1.2.3.4")]));
        assert_eq!(resolved.address, peer);
        assert!(resolved.routable);
    }

    #[test]
    fn trusted_proxy_uses_first_forwarded_entry() {
        let r = resolver(&["10.0.0.0/8"]);
        let peer: IpAddr = "10.0.0.5".parse().unwrap();
        let resolved = r.resolve(
            Some(peer),
            &headers(&[("x-forwarded-for", "1.2.3.4, 10.0.0.5")]),
        );
        assert_eq!(resolved.address, "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn falls_through_header_order() {
        let r = resolver(&["10.0.0.0/8"]);
        let peer: IpAddr = "10.0.0.5".parse().unwrap();
        let resolved = r.resolve(
            Some(peer),
            &headers(&[("x-forwarded-for", "not-an-address"), ("x-real-ip", "5.6.7.8")]),
        );
        assert_eq!(resolved.address, "5.6.7.8".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn trusted_proxy_without_usable_headers_keeps_peer() {
        let r = resolver(&["10.0.0.0/8"]);
        let peer: IpAddr = "10.0.0.5".parse().unwrap();
        let resolved = r.resolve(Some(peer), &HeaderMap::new());
        assert_eq!(resolved.address, peer);
        assert!(!resolved.routable);
    }

    #[test]
    fn no_peer_falls_back_to_loopback() {
        let r = resolver(&[]);
        let resolved = r.resolve(None, &HeaderMap::new());
        assert_eq!(resolved.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(!resolved.routable);
    }
}
