//! Value codec.
//!
//! Translates [`Value`]s to and from the JSON text kept in the `value` column.
//! Standard JSON is extended with two marker strings:
//!
//! - big integers are written as their decimal digits followed by `n`
//!   (`1212n`, `-5n`)
//! - positive infinity is written as `"Infinity"`
//!
//! On the way back every *string* leaf is checked against both markers, so a
//! genuine string such as `"42n"` is read back as a big integer. That collision
//! is inherent to the format and is not papered over.
//!
//! `NaN` and negative infinity have no marker and are rejected by [`encode`].
//! So is anything nested deeper than [`MAX_NESTING_DEPTH`] arrays and
//! objects, which the JSON parser would refuse to read back.

use crate::models::Value;
use crate::{Error, Result};
use num_bigint::BigInt;
use regex::Regex;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// Suffix marking a string as an encoded big integer.
pub const BIGINT_MARKER: char = 'n';

/// String standing in for positive infinity.
pub const INFINITY_MARKER: &str = "Infinity";

/// Deepest array/object nesting [`encode`] accepts.
///
/// `serde_json` stops parsing at its 128th nested container, so this is the
/// last depth that still decodes.
pub const MAX_NESTING_DEPTH: usize = 127;

static BIGINT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^-?[0-9]+n$").expect("static regex must compile")
});

/// Encodes a value as JSON text.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the value contains `NaN` or negative
/// infinity anywhere in its tree, or nests more than [`MAX_NESTING_DEPTH`]
/// containers.
///
/// # Examples
///
/// ```rust
/// use num_bigint::BigInt;
/// use sqlmap::codec::encode;
/// use sqlmap::Value;
///
/// let value: Value = [("a", Value::BigInt(BigInt::from(1212))), ("b", Value::infinity())]
///     .into_iter()
///     .collect();
/// assert_eq!(encode(&value)?, r#"{"a":"1212n","b":"Infinity"}"#);
/// # Ok::<(), sqlmap::Error>(())
/// ```
pub fn encode(value: &Value) -> Result<String> {
    check_depth(value)?;
    serde_json::to_string(value).map_err(|e| Error::InvalidInput(e.to_string()))
}

/// Rejects trees nested deeper than [`MAX_NESTING_DEPTH`].
///
/// Walks with an explicit stack; serializing an over-deep tree recursively
/// would exhaust the thread's stack first.
fn check_depth(value: &Value) -> Result<()> {
    let mut pending = vec![(value, 0usize)];
    while let Some((node, depth)) = pending.pop() {
        if !matches!(node, Value::Array(_) | Value::Object(_)) {
            continue;
        }
        let depth = depth + 1;
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::InvalidInput(format!(
                "value nests deeper than {MAX_NESTING_DEPTH} arrays/objects"
            )));
        }
        match node {
            Value::Array(items) => pending.extend(items.iter().map(|child| (child, depth))),
            Value::Object(map) => pending.extend(map.values().map(|child| (child, depth))),
            _ => {},
        }
    }
    Ok(())
}

/// Decodes JSON text read from the row identified by `id`.
///
/// # Errors
///
/// Returns [`Error::Decode`] naming `id` and wrapping the parse error when
/// `raw` is not valid JSON.
pub fn decode(id: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|source| Error::Decode {
        id: id.to_string(),
        raw: raw.to_string(),
        source,
    })
}

/// Decodes a `value` column, where SQL `NULL` reads as [`Value::Null`].
///
/// # Errors
///
/// Returns [`Error::Decode`] as [`decode`] does.
pub fn decode_column(id: &str, raw: Option<&str>) -> Result<Value> {
    raw.map_or(Ok(Value::Null), |raw| decode(id, raw))
}

/// Reinterprets a decoded string leaf, applying the marker rules.
fn revive_string(s: String) -> Value {
    if s == INFINITY_MARKER {
        return Value::infinity();
    }
    if BIGINT_PATTERN.is_match(&s) {
        if let Ok(n) = s[..s.len() - 1].parse::<BigInt>() {
            return Value::BigInt(n);
        }
    }
    Value::String(s)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::BigInt(n) => serializer.serialize_str(&format!("{n}{BIGINT_MARKER}")),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(f) if *f == f64::INFINITY => serializer.serialize_str(INFINITY_MARKER),
            Self::Float(f) => Err(ser::Error::custom(format!(
                "cannot encode non-finite float {f}: only +Infinity has a marker"
            ))),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            },
            Self::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, item) in map {
                    out.serialize_entry(key, item)?;
                }
                out.end()
            },
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Deserialize::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> std::result::Result<Value, E> {
        Ok(i64::try_from(u).map_or_else(|_| Value::BigInt(BigInt::from(u)), Value::Int))
    }

    fn visit_f64<E: de::Error>(self, f: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> std::result::Result<Value, E> {
        Ok(revive_string(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> std::result::Result<Value, E> {
        Ok(revive_string(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, item)) = access.next_entry::<String, Value>()? {
            map.insert(key, item);
        }
        Ok(Value::Object(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
