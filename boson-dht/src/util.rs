//! Address-family helpers
//!
//! Bogon filtering keeps unroutable addresses out of lookup candidate
//! sets and out of the routing table. Developer mode skips these checks
//! so local multi-node test rigs can use loopback addresses.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// An endpoint that cannot be a valid public DHT contact
pub fn is_bogon(addr: &SocketAddr) -> bool {
    addr.port() == 0 || is_bogon_ip(&addr.ip())
}

pub fn is_bogon_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_bogon_v4(v4),
        IpAddr::V6(v6) => is_bogon_v6(v6),
    }
}

fn is_bogon_v4(ip: &Ipv4Addr) -> bool {
    // 100.64.0.0/10 (carrier-grade NAT)
    let shared = ip.octets()[0] == 100 && (ip.octets()[1] & 0xC0) == 64;
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || shared
}

fn is_bogon_v6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    // fc00::/7 (unique local) and fe80::/10 (link local)
    let unique_local = (segments[0] & 0xFE00) == 0xFC00;
    let link_local = (segments[0] & 0xFFC0) == 0xFE80;
    // 2001:db8::/32 (documentation)
    let documentation = segments[0] == 0x2001 && segments[1] == 0x0DB8;
    ip.is_unspecified() || ip.is_loopback() || ip.is_multicast() || unique_local || link_local || documentation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sock(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_v4_bogons() {
        for bogon in [
            "0.0.0.0:3900",
            "127.0.0.1:3900",
            "10.1.2.3:3900",
            "172.16.0.1:3900",
            "192.168.1.1:3900",
            "169.254.0.1:3900",
            "100.64.0.1:3900",
            "224.0.0.1:3900",
            "255.255.255.255:3900",
        ] {
            assert!(is_bogon(&sock(bogon)), "{}", bogon);
        }
        // TEST-NET ranges are documentation space, also bogons
        assert!(is_bogon(&sock("198.51.100.1:3900")));
        assert!(!is_bogon_ip(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_v6_bogons() {
        for bogon in ["[::1]:3900", "[fe80::1]:3900", "[fc00::1]:3900", "[ff02::1]:3900"] {
            assert!(is_bogon(&sock(bogon)), "{}", bogon);
        }
        assert!(!is_bogon(&sock("[2606:4700::1111]:3900")));
    }

    #[test]
    fn test_zero_port_is_bogon() {
        assert!(is_bogon(&sock("8.8.8.8:0")));
    }
}
