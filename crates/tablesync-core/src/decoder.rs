//! Conversion of typed attribute values into plain JSON documents.
//!
//! # Conversion rules
//!
//! | Typed value | Plain value |
//! |-------------|-------------|
//! | String      | string |
//! | Number      | integer when the text fits `i64`/`u64`, otherwise `f64` |
//! | Boolean, Null | bool, null |
//! | Binary      | base64 string |
//! | String/Number/Binary set | array of strings, delivery order |
//! | Map         | object, field names escaped via [`escape_field_name`] |
//! | List        | array; see *Mixed lists* |
//!
//! Numbers wider than 64-bit integers or with more than ~15 significant
//! digits are represented as `f64` and lose precision. Non-finite results
//! (`1e400`, `NaN`) are rejected.
//!
//! # Mixed lists
//!
//! Search engines flatten nested arrays and require every leaf of an array
//! field to share one type. When the non-null leaves of a list, looking
//! through nested arrays, decode to more than one JSON kind, every non-null
//! element is converted to text: strings as-is,
//! numbers as their delivered decimal text, booleans as `true`/`false`,
//! binaries as base64 and composite values as compact JSON. Nulls stay null.
//! `[S "x", N "2"]` therefore becomes `["x", "2"]`, and
//! `[SS ["a"], L [N "1"]]` becomes `["[\"a\"]", "[1]"]`.

use crate::error::{AttributePath, DecodeError, DecodeResult};
use crate::escape::escape_field_name;
use crate::value::{AttributeMap, TypedValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Number, Value};

/// Decode a full image into a document body
pub fn decode_image(image: &AttributeMap) -> DecodeResult<Map<String, Value>> {
    let mut body = Map::with_capacity(image.len());
    for (name, value) in image {
        let decoded = decode_at(value, &AttributePath::Root(name))?;
        body.insert(escape_field_name(name).into_owned(), decoded);
    }
    Ok(body)
}

/// Decode a single attribute value. `name` is used for error paths.
pub fn decode_value(name: &str, value: &TypedValue) -> DecodeResult<Value> {
    decode_at(value, &AttributePath::Root(name))
}

fn decode_at(value: &TypedValue, path: &AttributePath<'_>) -> DecodeResult<Value> {
    Ok(match value {
        TypedValue::String(s) => Value::String(s.clone()),
        TypedValue::Number(n) => decode_number(n, path)?,
        TypedValue::Boolean(b) => Value::Bool(*b),
        TypedValue::Null => Value::Null,
        TypedValue::Binary(bytes) => Value::String(BASE64.encode(bytes)),
        TypedValue::StringSet(items) | TypedValue::NumberSet(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        TypedValue::BinarySet(items) => Value::Array(
            items
                .iter()
                .map(|bytes| Value::String(BASE64.encode(bytes)))
                .collect(),
        ),
        TypedValue::Map(fields) => {
            let mut object = Map::with_capacity(fields.len());
            for (name, child) in fields {
                let decoded = decode_at(child, &path.field(name))?;
                object.insert(escape_field_name(name).into_owned(), decoded);
            }
            Value::Object(object)
        }
        TypedValue::List(items) => decode_list(items, path)?,
    })
}

fn decode_number(text: &str, path: &AttributePath<'_>) -> DecodeResult<Value> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(u) = text.parse::<u64>() {
        return Ok(Value::from(u));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| DecodeError::InvalidNumber {
            path: path.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Number,
    String,
    Object,
}

/// Collect the distinct kinds of the non-null leaves under `value`
fn leaf_kinds(value: &Value, kinds: &mut Vec<Kind>) {
    let kind = match value {
        Value::Null => return,
        Value::Array(items) => {
            items.iter().for_each(|item| leaf_kinds(item, kinds));
            return;
        }
        Value::Bool(_) => Kind::Bool,
        Value::Number(_) => Kind::Number,
        Value::String(_) => Kind::String,
        Value::Object(_) => Kind::Object,
    };
    if !kinds.contains(&kind) {
        kinds.push(kind);
    }
}

fn decode_list(items: &[TypedValue], path: &AttributePath<'_>) -> DecodeResult<Value> {
    let decoded = items
        .iter()
        .enumerate()
        .map(|(i, item)| decode_at(item, &path.index(i)))
        .collect::<DecodeResult<Vec<_>>>()?;

    let mut kinds = Vec::new();
    decoded.iter().for_each(|item| leaf_kinds(item, &mut kinds));
    if kinds.len() <= 1 {
        return Ok(Value::Array(decoded));
    }

    Ok(Value::Array(
        items
            .iter()
            .zip(decoded)
            .map(|(typed, plain)| match (typed, plain) {
                (_, Value::Null) => Value::Null,
                (TypedValue::Number(n), _) => Value::String(n.trim().to_string()),
                (_, Value::String(s)) => Value::String(s),
                (_, Value::Bool(b)) => Value::String(b.to_string()),
                (_, other) => Value::String(other.to_string()),
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn wire(node: serde_json::Value) -> TypedValue {
        TypedValue::from_wire("attr", &node).unwrap()
    }

    #[test]
    fn test_decode_numbers() {
        assert_eq!(decode_value("n", &wire(json!({"N": "42"}))).unwrap(), json!(42));
        assert_eq!(decode_value("n", &wire(json!({"N": "-7"}))).unwrap(), json!(-7));
        assert_eq!(decode_value("n", &wire(json!({"N": "42.5"}))).unwrap(), json!(42.5));
        assert_eq!(
            decode_value("n", &wire(json!({"N": "18446744073709551615"}))).unwrap(),
            json!(u64::MAX)
        );
        assert_eq!(decode_value("n", &wire(json!({"N": "1e3"}))).unwrap(), json!(1000.0));
    }

    #[test]
    fn test_reject_non_finite_numbers() {
        for text in ["1e400", "NaN", "inf", "abc", ""] {
            let err = decode_value("Total", &TypedValue::Number(text.into())).unwrap_err();
            assert_eq!(err, DecodeError::InvalidNumber { path: "Total".into() });
        }
    }

    #[test]
    fn test_decode_binary_and_sets() {
        assert_eq!(
            decode_value("b", &TypedValue::Binary(b"hi".to_vec())).unwrap(),
            json!("aGk=")
        );
        assert_eq!(
            decode_value("ns", &wire(json!({"NS": ["1", "2.50"]}))).unwrap(),
            json!(["1", "2.50"])
        );
        assert_eq!(
            decode_value("bs", &wire(json!({"BS": ["aGk="]}))).unwrap(),
            json!(["aGk="])
        );
    }

    #[test]
    fn test_decode_image_escapes_nested_fields() {
        let image: AttributeMap = [
            ("_id".to_string(), wire(json!({"S": "shadow"}))),
            (
                "meta".to_string(),
                wire(json!({"M": {"_source": {"S": "x"}, "plain": {"BOOL": true}}})),
            ),
        ]
        .into_iter()
        .collect();

        let body = decode_image(&image).unwrap();
        assert_eq!(
            Value::Object(body),
            json!({"__id": "shadow", "meta": {"__source": "x", "plain": true}})
        );
    }

    #[test]
    fn test_mixed_list_is_coerced_to_text() {
        let list = wire(json!({"L": [{"S": "x"}, {"N": "2"}]}));
        assert_eq!(decode_value("l", &list).unwrap(), json!(["x", "2"]));

        let list = wire(json!({"L": [
            {"N": "2.50"},
            {"BOOL": true},
            {"NULL": true},
            {"M": {"a": {"N": "1"}}},
            {"SS": ["p"]}
        ]}));
        assert_eq!(
            decode_value("l", &list).unwrap(),
            json!(["2.50", "true", null, "{\"a\":1}", "[\"p\"]"])
        );
    }

    #[test]
    fn test_nested_arrays_classified_by_leaves() {
        let list = wire(json!({"L": [{"SS": ["a"]}, {"L": [{"N": "1"}]}]}));
        assert_eq!(decode_value("l", &list).unwrap(), json!(["[\"a\"]", "[1]"]));

        let list = wire(json!({"L": [{"SS": ["a"]}, {"S": "b"}, {"L": []}]}));
        assert_eq!(decode_value("l", &list).unwrap(), json!([["a"], "b", []]));

        // Number sets decode to text, so they mix with nested numbers
        let list = wire(json!({"L": [{"NS": ["1"]}, {"L": [{"N": "2"}, {"NULL": true}]}]}));
        assert_eq!(decode_value("l", &list).unwrap(), json!(["[\"1\"]", "[2,null]"]));
    }

    #[test]
    fn test_homogeneous_list_keeps_types() {
        let list = wire(json!({"L": [{"N": "1"}, {"NULL": true}, {"N": "2.5"}]}));
        assert_eq!(decode_value("l", &list).unwrap(), json!([1, null, 2.5]));

        let empty = wire(json!({"L": []}));
        assert_eq!(decode_value("l", &empty).unwrap(), json!([]));
    }

    #[test]
    fn test_nested_error_path() {
        let value = wire(json!({"L": [{"M": {"price": {"N": "oops"}}}]}));
        assert_eq!(
            decode_value("Items", &value).unwrap_err(),
            DecodeError::InvalidNumber {
                path: "Items[0].price".into()
            }
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(512))]

        #[test]
        fn prop_string_content_preserved(s in any::<String>()) {
            let decoded = decode_value("s", &TypedValue::String(s.clone())).unwrap();
            prop_assert_eq!(decoded, Value::String(s));
        }

        #[test]
        fn prop_integer_magnitude_preserved(i in any::<i64>()) {
            let decoded = decode_value("n", &TypedValue::Number(i.to_string())).unwrap();
            prop_assert_eq!(decoded.as_i64(), Some(i));
        }

        #[test]
        fn prop_float_magnitude_preserved(f in -1.0e12f64..1.0e12f64) {
            let text = format!("{f:.3}");
            let decoded = decode_value("n", &TypedValue::Number(text.clone())).unwrap();
            let expected: f64 = text.parse().unwrap();
            prop_assert_eq!(decoded.as_f64(), Some(expected));
        }

        #[test]
        fn prop_string_set_order_preserved(items in prop::collection::vec("[a-z]{0,8}", 0..16)) {
            let decoded = decode_value("ss", &TypedValue::StringSet(items.clone())).unwrap();
            prop_assert_eq!(decoded, json!(items));
        }
    }
}
