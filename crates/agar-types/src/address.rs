//! Participant address
//!
//! Addresses are compared case-insensitively; the canonical form is the
//! lowercase `0x`-prefixed 40 hex digit string.

use crate::TypesError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Canonicalized (lowercase) 20-byte account address
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    /// Parse and canonicalize an address string
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        let trimmed = raw.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| TypesError::InvalidAddress(raw.to_string()))?;

        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypesError::InvalidAddress(raw.to_string()));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    /// Build from raw 20 bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        let mut s = String::with_capacity(42);
        s.push_str("0x");
        for b in bytes {
            s.push_str(&format!("{:02x}", b));
        }
        Self(s)
    }

    /// Raw 20 bytes of the address
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        let hex_part = &self.0[2..];
        for (i, chunk) in hex_part.as_bytes().chunks(2).enumerate() {
            // Canonical form guarantees valid hex pairs
            let pair = std::str::from_utf8(chunk).unwrap_or("00");
            out[i] = u8::from_str_radix(pair, 16).unwrap_or(0);
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines (`0x1234..abcd`)
    pub fn short(&self) -> String {
        format!("{}..{}", &self.0[..6], &self.0[38..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonicalizes_case() {
        let upper = Address::parse("0xABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap();
        let lower = Address::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Address::parse("abcdef").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xZZcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn test_bytes_round_trip() {
        let addr = Address::parse("0x52599d9b45f876a70241905bf9f17bc060b51afb").unwrap();
        assert_eq!(Address::from_bytes(addr.to_bytes()), addr);
    }

    #[test]
    fn test_deserialize_canonicalizes() {
        let addr: Address =
            serde_json::from_str("\"0x52599D9b45f876a70241905bf9F17bc060B51aFb\"").unwrap();
        assert_eq!(addr.as_str(), "0x52599d9b45f876a70241905bf9f17bc060b51afb");
    }
}
