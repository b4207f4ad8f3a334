//! The flat value type of the client-facing marshaling contract: every YANG
//! leaf type plus the data-less structural tags used when walking a tree as
//! a flat list of `(xpath, type, default-flag, payload)` entries.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single typed value. Structural variants (`List`, `Container`,
/// `PresenceContainer`, `Notification`, `EmptyLeaf`) carry no payload: these
/// variants mark node *kind*, not leaf data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "data")]
pub enum Value {
    List,
    Container,
    PresenceContainer,
    EmptyLeaf,
    Notification,
    Binary(Vec<u8>),
    Bits(Vec<String>),
    Bool(bool),
    Decimal64 { digits: i64, fraction_digits: u8 },
    Enum(String),
    Identityref(String),
    InstanceId(String),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    String(String),
    Anyxml(String),
    Anydata(serde_json::Value),
}

impl Value {
    /// True for the data-less structural tags.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Value::List
                | Value::Container
                | Value::PresenceContainer
                | Value::Notification
                | Value::EmptyLeaf
        )
    }

    /// Decimal64 as a float, for comparison purposes only (lossy at the
    /// extremes of the 64-bit digit range; comparisons use an
    /// epsilon-scaled tolerance rather than exact fixed-point arithmetic).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Decimal64 {
                digits,
                fraction_digits,
            } => Some(*digits as f64 / 10f64.powi(*fraction_digits as i32)),
            Value::Int8(v) => Some(*v as f64),
            Value::Int16(v) => Some(*v as f64),
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Uint8(v) => Some(*v as f64),
            Value::Uint16(v) => Some(*v as f64),
            Value::Uint32(v) => Some(*v as f64),
            Value::Uint64(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// A flat, xpath-addressed value as exposed across the client boundary.
/// `parse`/`serialize` round-trip a [`Value`] through this type losslessly
/// for every variant above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlatValue {
    pub xpath: String,
    pub value: Value,
    #[serde(default)]
    pub is_default: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(v: Value) {
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back, "json={json}");
    }

    #[test]
    fn test_roundtrip_every_variant() {
        roundtrip(Value::List);
        roundtrip(Value::Container);
        roundtrip(Value::PresenceContainer);
        roundtrip(Value::EmptyLeaf);
        roundtrip(Value::Notification);
        roundtrip(Value::Binary(vec![1, 2, 3]));
        roundtrip(Value::Bits(vec!["a".into(), "b".into()]));
        roundtrip(Value::Bool(true));
        roundtrip(Value::Decimal64 {
            digits: 12345,
            fraction_digits: 2,
        });
        roundtrip(Value::Enum("up".into()));
        roundtrip(Value::Identityref("m:foo".into()));
        roundtrip(Value::InstanceId("/m:a/b".into()));
        roundtrip(Value::Int8(-1));
        roundtrip(Value::Int16(-1));
        roundtrip(Value::Int32(-1));
        roundtrip(Value::Int64(-1));
        roundtrip(Value::Uint8(1));
        roundtrip(Value::Uint16(1));
        roundtrip(Value::Uint32(1));
        roundtrip(Value::Uint64(1));
        roundtrip(Value::String("hi".into()));
        roundtrip(Value::Anyxml("<a/>".into()));
        roundtrip(Value::Anydata(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_decimal64_as_f64() {
        let v = Value::Decimal64 {
            digits: 1234,
            fraction_digits: 2,
        };
        assert_eq!(v.as_f64(), Some(12.34));
    }
}
