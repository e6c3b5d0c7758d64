use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IPv4 ranges that must never be dialed on behalf of a feed URL.
const BLOCKED_V4: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),          // "this" network
    (Ipv4Addr::new(10, 0, 0, 0), 8),         // RFC 1918
    (Ipv4Addr::new(100, 64, 0, 0), 10),      // carrier-grade NAT
    (Ipv4Addr::new(127, 0, 0, 0), 8),        // loopback
    (Ipv4Addr::new(169, 254, 0, 0), 16),     // link-local
    (Ipv4Addr::new(172, 16, 0, 0), 12),      // RFC 1918
    (Ipv4Addr::new(192, 0, 0, 0), 24),       // IETF protocol assignments
    (Ipv4Addr::new(192, 0, 2, 0), 24),       // TEST-NET-1
    (Ipv4Addr::new(192, 168, 0, 0), 16),     // RFC 1918
    (Ipv4Addr::new(198, 18, 0, 0), 15),      // benchmarking
    (Ipv4Addr::new(198, 51, 100, 0), 24),    // TEST-NET-2
    (Ipv4Addr::new(203, 0, 113, 0), 24),     // TEST-NET-3
    (Ipv4Addr::new(224, 0, 0, 0), 4),        // multicast
    (Ipv4Addr::new(240, 0, 0, 0), 4),        // reserved
    (Ipv4Addr::new(255, 255, 255, 255), 32), // broadcast
];

const BLOCKED_V6: &[(Ipv6Addr, u8)] = &[
    (Ipv6Addr::UNSPECIFIED, 128),
    (Ipv6Addr::LOCALHOST, 128),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7), // unique local
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10), // link-local
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8), // multicast
    (Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 0), 32), // documentation
];

/// Returns true if `ip` falls inside any deny-listed range.
///
/// IPv6 addresses that embed an IPv4 address (`::ffff:a.b.c.d`,
/// `::a.b.c.d`, and the NAT64 prefix `64:ff9b::/96`) are judged by the
/// embedded IPv4 address so `::ffff:127.0.0.1` cannot slip through.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => BLOCKED_V4
            .iter()
            .any(|(net, prefix)| v4_contains(*net, *prefix, v4)),
        IpAddr::V6(v6) => {
            if BLOCKED_V6
                .iter()
                .any(|(net, prefix)| v6_contains(*net, *prefix, v6))
            {
                return true;
            }
            match embedded_ipv4(v6) {
                Some(v4) => is_blocked_ip(IpAddr::V4(v4)),
                None => false,
            }
        }
    }
}

/// Returns true for the loopback ranges only (`127.0.0.0/8`, `::1`).
pub fn is_loopback_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || embedded_ipv4(v6).is_some_and(|v4| v4.is_loopback())
        }
    }
}

fn v4_contains(net: Ipv4Addr, prefix: u8, ip: Ipv4Addr) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    (u32::from(ip) & mask) == (u32::from(net) & mask)
}

fn v6_contains(net: Ipv6Addr, prefix: u8, ip: Ipv6Addr) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    };
    (u128::from(ip) & mask) == (u128::from(net) & mask)
}

fn embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }
    let segments = ip.segments();
    let low = Ipv4Addr::new(
        (segments[6] >> 8) as u8,
        segments[6] as u8,
        (segments[7] >> 8) as u8,
        segments[7] as u8,
    );
    // IPv4-compatible (::a.b.c.d, deprecated but still routable by some stacks)
    if segments[..6].iter().all(|s| *s == 0) {
        return Some(low);
    }
    // NAT64 well-known prefix 64:ff9b::/96
    if segments[0] == 0x0064 && segments[1] == 0xff9b && segments[2..6].iter().all(|s| *s == 0) {
        return Some(low);
    }
    None
}
