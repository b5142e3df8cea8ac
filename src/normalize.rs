//! Candidate IP validation and canonicalisation.
//!
//! Every feed entry and every lookup passes through [`normalize`], so two
//! spellings of the same address always land on the same store key.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Validate a candidate string and return its canonical address.
///
/// Surrounding whitespace is ignored. IPv4 octets with leading zeros are
/// decimal (`010.000.000.001` is `10.0.0.1`). IPv6 is case-insensitive, and
/// IPv4-mapped IPv6 addresses collapse to their IPv4 form. Anything else,
/// including CIDR ranges and hostnames, is rejected with `None`.
pub fn normalize(candidate: &str) -> Option<IpAddr> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(v4) = parse_ipv4_decimal(trimmed) {
        return Some(IpAddr::V4(v4));
    }

    let v6: Ipv6Addr = trimmed.parse().ok()?;
    Some(match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    })
}

/// Dotted-quad parser that tolerates zero-padded octets.
///
/// `Ipv4Addr::from_str` rejects leading zeros outright; feeds in the wild
/// still publish them.
fn parse_ipv4_decimal(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');

    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse().ok()?;
    }

    if parts.next().is_some() {
        return None;
    }

    Some(Ipv4Addr::from(octets))
}
