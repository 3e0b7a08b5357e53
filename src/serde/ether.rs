//! (De)serializes wei amounts as decimal ether, e.g. `"0.05"`.
//!
//! Both strings and plain numbers are accepted when deserializing, so `0.05` and `"0.05"` are
//! equivalent in YAML.

use alloy::primitives::{
    U256,
    utils::{format_ether, parse_ether},
};
use serde::{Deserialize, Deserializer, Serializer, de::Error};

#[derive(Deserialize)]
#[serde(untagged)]
enum EtherRepr {
    Text(String),
    Number(f64),
}

impl EtherRepr {
    fn parse<E: Error>(self) -> Result<U256, E> {
        let text = match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        };
        parse_ether(text.trim()).map_err(E::custom)
    }
}

/// Serializes a wei amount as a decimal ether string.
pub fn serialize<S>(amount: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_ether(*amount))
}

/// Deserializes a decimal ether amount into wei.
pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    EtherRepr::deserialize(deserializer)?.parse()
}

/// Same as the parent module, for optional amounts.
pub mod option {
    use super::*;

    /// Serializes an optional wei amount as a decimal ether string.
    pub fn serialize<S>(amount: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match amount {
            Some(amount) => serializer.serialize_some(&format_ether(*amount)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes an optional decimal ether amount into wei.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<EtherRepr>::deserialize(deserializer)?.map(EtherRepr::parse).transpose()
    }
}
