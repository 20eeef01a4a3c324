//! Peer identity: a peer is known by the IPv4 literal it connects from.

use std::net::{IpAddr, SocketAddr};

/// Canonical peer key for a remote socket address.
pub fn peer_ip(addr: &SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
    }
}

/// Normalize a textual address: drop an IPv6-mapped prefix and any `%scope` suffix.
pub fn normalize_peer_ip(raw: &str) -> String {
    let trimmed = raw.trim();
    let unscoped = trimmed.split('%').next().unwrap_or(trimmed);
    let unmapped = unscoped
        .strip_prefix("::ffff:")
        .or_else(|| unscoped.strip_prefix("::FFFF:"))
        .unwrap_or(unscoped);
    unmapped.trim().to_string()
}
