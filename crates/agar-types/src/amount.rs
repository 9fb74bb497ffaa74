//! Serde helpers for amounts
//!
//! Amounts travel as decimal strings on the wire so that JavaScript clients
//! do not lose precision. Deserialization also accepts plain JSON integers.

use crate::Amount;
use serde::{de, Deserializer, Serializer};
use std::fmt;

pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    deserializer.deserialize_any(AmountVisitor)
}

struct AmountVisitor;

impl<'de> de::Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer or decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(v as Amount)
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        u128::try_from(v).map_err(|_| E::custom(format!("negative amount: {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.parse::<Amount>()
            .map_err(|_| E::custom(format!("invalid amount: {}", v)))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Wrapper {
        #[serde(with = "crate::amount")]
        value: u128,
    }

    #[test]
    fn test_large_amount_as_string() {
        let w = Wrapper { value: 5_000_000_000_000_000_000_000 };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"value":"5000000000000000000000"}"#);
    }

    #[test]
    fn test_accepts_number_and_string() {
        let a: Wrapper = serde_json::from_str(r#"{"value":42}"#).unwrap();
        let b: Wrapper = serde_json::from_str(r#"{"value":"42"}"#).unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_str::<Wrapper>(r#"{"value":-1}"#).is_err());
    }
}
