pub mod lookup;
pub mod provider;

use std::net::IpAddr;

/// Whether an address belongs to a private, loopback, or link-local range.
/// These never go to the geolocation provider and never enter its cache.
pub fn is_private_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (seg[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (seg[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges() {
        for addr in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.9",
            "192.168.1.1",
            "169.254.0.5",
            "::1",
            "fc00::1",
            "fe80::1",
        ] {
            assert!(is_private_address(&addr.parse().unwrap()), "{}", addr);
        }
    }

    #[test]
    fn public_ranges() {
        for addr in ["8.8.8.8", "1.2.3.4", "172.32.0.1", "2001:4860:4860::8888"] {
            assert!(!is_private_address(&addr.parse().unwrap()), "{}", addr);
        }
    }
}
