//! `Indicator` (spec.md §3): a tagged security observable. Equality is by
//! `(kind, normalized value)` — IPs are parsed and re-emitted canonically,
//! domains are lowercased — so the same indicator expressed two different
//! ways on the wire compares equal once constructed through these
//! constructors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Indicator {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
    Url(String),
    FileHash(String),
}

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("empty indicator value")]
    Empty,
    #[error("not a valid URL: {0}")]
    InvalidUrl(String),
    #[error("not a valid file hash: {0}")]
    InvalidHash(String),
}

impl Indicator {
    /// Parse and normalize a free-text string into the first matching
    /// indicator kind: IPv4, then IPv6, then a bare hex hash (32/40/64 hex
    /// chars — md5/sha1/sha256), then a URL (contains `://`), else a
    /// lowercased domain.
    pub fn parse(raw: &str) -> Result<Self, IndicatorError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IndicatorError::Empty);
        }

        if let Ok(ip) = Ipv4Addr::from_str(trimmed) {
            return Ok(Indicator::Ipv4(ip));
        }
        if let Ok(ip) = Ipv6Addr::from_str(trimmed) {
            return Ok(Indicator::Ipv6(ip));
        }
        if let Ok(ip) = IpAddr::from_str(trimmed) {
            return Ok(match ip {
                IpAddr::V4(v4) => Indicator::Ipv4(v4),
                IpAddr::V6(v6) => Indicator::Ipv6(v6),
            });
        }
        if is_hex_hash(trimmed) {
            return Ok(Indicator::FileHash(trimmed.to_lowercase()));
        }
        if trimmed.contains("://") {
            return Ok(Indicator::Url(trimmed.to_string()));
        }
        Ok(Indicator::Domain(trimmed.to_lowercase()))
    }

    pub fn ipv4(addr: Ipv4Addr) -> Self {
        Indicator::Ipv4(addr)
    }

    pub fn domain(raw: &str) -> Self {
        Indicator::Domain(raw.trim().to_lowercase())
    }

    /// The `/prefix_len` subnet this indicator's address falls in, if it is
    /// an IP indicator (used by the correlator's network stage, spec.md
    /// §4.9 stage 6).
    pub fn subnet(&self, prefix_len: u8) -> Option<String> {
        match self {
            Indicator::Ipv4(addr) => {
                let mask = if prefix_len >= 32 {
                    u32::MAX
                } else {
                    !0u32 << (32 - prefix_len)
                };
                let network = u32::from(*addr) & mask;
                Some(format!("{}/{}", Ipv4Addr::from(network), prefix_len))
            }
            Indicator::Ipv6(addr) => {
                let bits = u128::from(*addr);
                let mask = if prefix_len >= 128 {
                    u128::MAX
                } else {
                    !0u128 << (128 - prefix_len)
                };
                Some(format!("{}/{}", Ipv6Addr::from(bits & mask), prefix_len))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indicator::Ipv4(addr) => write!(f, "{addr}"),
            Indicator::Ipv6(addr) => write!(f, "{addr}"),
            Indicator::Domain(d) => write!(f, "{d}"),
            Indicator::Url(u) => write!(f, "{u}"),
            Indicator::FileHash(h) => write!(f, "{h}"),
        }
    }
}

fn is_hex_hash(value: &str) -> bool {
    matches!(value.len(), 32 | 40 | 64) && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4() {
        let ind = Indicator::parse("203.0.113.10").unwrap();
        assert_eq!(ind, Indicator::Ipv4("203.0.113.10".parse().unwrap()));
    }

    #[test]
    fn domains_are_lowercased_for_equality() {
        let a = Indicator::parse("C2.Example.TEST").unwrap();
        let b = Indicator::parse("c2.example.test").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn detects_sha256_hash() {
        let hash = "a".repeat(64);
        let ind = Indicator::parse(&hash).unwrap();
        assert_eq!(ind, Indicator::FileHash(hash));
    }

    #[test]
    fn detects_url_by_scheme_separator() {
        let ind = Indicator::parse("https://c2.example.test/beacon").unwrap();
        assert!(matches!(ind, Indicator::Url(_)));
    }

    #[test]
    fn subnet_masks_ipv4_to_slash_24() {
        let ind = Indicator::ipv4("203.0.113.10".parse().unwrap());
        assert_eq!(ind.subnet(24).unwrap(), "203.0.113.0/24");
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(Indicator::parse("   "), Err(IndicatorError::Empty)));
    }
}
