//! Tagged-union attribute values as delivered on the change stream.
//!
//! Every node on the wire is a JSON object with exactly one tag:
//!
//! | Tag    | Variant                   | Payload                      |
//! |--------|---------------------------|------------------------------|
//! | `S`    | [`TypedValue::String`]    | string                       |
//! | `N`    | [`TypedValue::Number`]    | decimal string               |
//! | `BOOL` | [`TypedValue::Boolean`]   | bool                         |
//! | `NULL` | [`TypedValue::Null`]      | `true`                       |
//! | `B`    | [`TypedValue::Binary`]    | base64 string                |
//! | `SS`   | [`TypedValue::StringSet`] | array of strings             |
//! | `NS`   | [`TypedValue::NumberSet`] | array of decimal strings     |
//! | `BS`   | [`TypedValue::BinarySet`] | array of base64 strings      |
//! | `M`    | [`TypedValue::Map`]       | object of nodes              |
//! | `L`    | [`TypedValue::List`]      | array of nodes               |
//!
//! Anything else is rejected with [`DecodeError`].

use crate::error::{AttributePath, DecodeError, DecodeResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use indexmap::IndexMap;
use serde_json::Value;

/// Attribute name to value, in delivery order
pub type AttributeMap = IndexMap<String, TypedValue>;

/// One attribute value in its typed form
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    /// Decimal text exactly as delivered
    Number(String),
    Boolean(bool),
    Null,
    Binary(Vec<u8>),
    StringSet(Vec<String>),
    NumberSet(Vec<String>),
    BinarySet(Vec<Vec<u8>>),
    Map(AttributeMap),
    List(Vec<TypedValue>),
}

impl TypedValue {
    /// Wire tag of this value
    pub fn tag(&self) -> &'static str {
        match self {
            TypedValue::String(_) => "S",
            TypedValue::Number(_) => "N",
            TypedValue::Boolean(_) => "BOOL",
            TypedValue::Null => "NULL",
            TypedValue::Binary(_) => "B",
            TypedValue::StringSet(_) => "SS",
            TypedValue::NumberSet(_) => "NS",
            TypedValue::BinarySet(_) => "BS",
            TypedValue::Map(_) => "M",
            TypedValue::List(_) => "L",
        }
    }

    /// Parse one wire node. `name` is used for error paths.
    pub fn from_wire(name: &str, node: &Value) -> DecodeResult<Self> {
        parse_node(node, &AttributePath::Root(name))
    }

    /// Render back to the wire encoding
    #[cfg(test)]
    pub(crate) fn to_wire(&self) -> Value {
        let (tag, payload) = match self {
            TypedValue::String(s) => ("S", Value::String(s.clone())),
            TypedValue::Number(n) => ("N", Value::String(n.clone())),
            TypedValue::Boolean(b) => ("BOOL", Value::Bool(*b)),
            TypedValue::Null => ("NULL", Value::Bool(true)),
            TypedValue::Binary(b) => ("B", Value::String(BASE64.encode(b))),
            TypedValue::StringSet(items) => ("SS", string_array(items.iter().cloned())),
            TypedValue::NumberSet(items) => ("NS", string_array(items.iter().cloned())),
            TypedValue::BinarySet(items) => {
                ("BS", string_array(items.iter().map(|b| BASE64.encode(b))))
            }
            TypedValue::Map(map) => (
                "M",
                Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), v.to_wire()))
                        .collect(),
                ),
            ),
            TypedValue::List(items) => ("L", Value::Array(items.iter().map(Self::to_wire).collect())),
        };
        let mut node = serde_json::Map::with_capacity(1);
        node.insert(tag.to_string(), payload);
        Value::Object(node)
    }
}

/// Parse a wire image (attribute name to node) preserving delivery order
pub fn parse_image<'a, I>(attributes: I) -> DecodeResult<AttributeMap>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    attributes
        .into_iter()
        .map(|(name, node)| Ok((name.clone(), TypedValue::from_wire(name, node)?)))
        .collect()
}

#[cfg(test)]
fn string_array(items: impl Iterator<Item = String>) -> Value {
    Value::Array(items.map(Value::String).collect())
}

fn parse_node(node: &Value, path: &AttributePath<'_>) -> DecodeResult<TypedValue> {
    let object = node
        .as_object()
        .ok_or_else(|| DecodeError::malformed(path, "expected a single-tag object"))?;

    let mut tags = object.iter();
    let (tag, payload) = match (tags.next(), tags.next()) {
        (Some(entry), None) => entry,
        (None, _) => return Err(DecodeError::malformed(path, "no type tag")),
        (Some(_), Some(_)) => {
            return Err(DecodeError::malformed(
                path,
                format!("expected one type tag, found {}", object.len()),
            ))
        }
    };

    match tag.as_str() {
        "S" => expect_str(payload, path).map(|s| TypedValue::String(s.to_string())),
        "N" => expect_str(payload, path).map(|s| TypedValue::Number(s.to_string())),
        "BOOL" => payload
            .as_bool()
            .map(TypedValue::Boolean)
            .ok_or_else(|| DecodeError::malformed(path, "BOOL payload must be a boolean")),
        "NULL" => match payload {
            Value::Bool(true) => Ok(TypedValue::Null),
            _ => Err(DecodeError::malformed(path, "NULL payload must be true")),
        },
        "B" => decode_base64(expect_str(payload, path)?, path).map(TypedValue::Binary),
        "SS" => string_items(payload, path).map(TypedValue::StringSet),
        "NS" => string_items(payload, path).map(TypedValue::NumberSet),
        "BS" => {
            let items = expect_array(payload, path)?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = path.index(i);
                out.push(decode_base64(expect_str(item, &item_path)?, &item_path)?);
            }
            Ok(TypedValue::BinarySet(out))
        }
        "M" => {
            let fields = payload
                .as_object()
                .ok_or_else(|| DecodeError::malformed(path, "M payload must be an object"))?;
            let mut map = AttributeMap::with_capacity(fields.len());
            for (name, child) in fields {
                map.insert(name.clone(), parse_node(child, &path.field(name))?);
            }
            Ok(TypedValue::Map(map))
        }
        "L" => {
            let items = expect_array(payload, path)?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| parse_node(item, &path.index(i)))
                .collect::<DecodeResult<Vec<_>>>()
                .map(TypedValue::List)
        }
        other => Err(DecodeError::UnknownType {
            tag: other.to_string(),
            path: path.to_string(),
        }),
    }
}

fn expect_str<'v>(payload: &'v Value, path: &AttributePath<'_>) -> DecodeResult<&'v str> {
    payload
        .as_str()
        .ok_or_else(|| DecodeError::malformed(path, "payload must be a string"))
}

fn expect_array<'v>(payload: &'v Value, path: &AttributePath<'_>) -> DecodeResult<&'v Vec<Value>> {
    payload
        .as_array()
        .ok_or_else(|| DecodeError::malformed(path, "payload must be an array"))
}

fn string_items(payload: &Value, path: &AttributePath<'_>) -> DecodeResult<Vec<String>> {
    let items = expect_array(payload, path)?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| expect_str(item, &path.index(i)).map(str::to_string))
        .collect()
}

fn decode_base64(text: &str, path: &AttributePath<'_>) -> DecodeResult<Vec<u8>> {
    BASE64.decode(text).map_err(|_| DecodeError::InvalidBinary {
        path: path.to_string(),
    })
}
