//! Deterministic document identifiers derived from record keys.

use crate::error::IdentifierError;
use crate::mapping::SchemaMapping;
use crate::value::{AttributeMap, TypedValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use metrics::counter;
use std::borrow::Cow;
use std::fmt;
use tracing::warn;

/// Separator between key parts in composite identifiers
pub const ID_DELIMITER: &str = "|";

/// Counter bumped whenever an id is derived without a schema mapping
pub const FALLBACK_METRIC: &str = "tablesync_identifier_fallback_total";

/// Identifier of a document in the search index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    id: String,
    deterministic: bool,
}

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// False when the id was built without a schema mapping and therefore
    /// depends on key delivery order.
    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    pub fn into_string(self) -> String {
        self.id
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Derive the document id for a record of `table` with the given keys.
///
/// With a mapping the id is the primary key text, followed by
/// [`ID_DELIMITER`] and the sort key text when the table has one. Without a
/// mapping every key attribute is joined in delivery order; that result is
/// only as stable as the delivery order, so it is flagged and warned about
/// on every call.
pub fn document_id(
    table: &str,
    keys: &AttributeMap,
    mapping: Option<&SchemaMapping>,
) -> Result<DocumentId, IdentifierError> {
    if keys.is_empty() {
        return Err(IdentifierError::EmptyKeys {
            table: table.to_string(),
        });
    }

    let Some(mapping) = mapping else {
        let parts = keys
            .iter()
            .map(|(name, value)| key_text(table, name, value))
            .collect::<Result<Vec<_>, _>>()?;

        warn!(
            table,
            key_attributes = keys.len(),
            "No key-schema mapping for table, document id follows key delivery order"
        );
        counter!(FALLBACK_METRIC).increment(1);
        return Ok(DocumentId {
            id: parts.join(ID_DELIMITER),
            deterministic: false,
        });
    };

    let mut id = mapped_key_text(table, keys, &mapping.primary_key)?.into_owned();
    if let Some(sort_key) = &mapping.sort_key {
        id.push_str(ID_DELIMITER);
        id.push_str(&mapped_key_text(table, keys, sort_key)?);
    }

    Ok(DocumentId {
        id,
        deterministic: true,
    })
}

fn mapped_key_text<'k>(
    table: &str,
    keys: &'k AttributeMap,
    attribute: &str,
) -> Result<Cow<'k, str>, IdentifierError> {
    let value = keys
        .get(attribute)
        .ok_or_else(|| IdentifierError::MissingKeyAttribute {
            table: table.to_string(),
            attribute: attribute.to_string(),
        })?;
    key_text(table, attribute, value)
}

fn key_text<'k>(
    table: &str,
    attribute: &str,
    value: &'k TypedValue,
) -> Result<Cow<'k, str>, IdentifierError> {
    match value {
        TypedValue::String(s) => Ok(Cow::Borrowed(s)),
        TypedValue::Number(n) => Ok(Cow::Borrowed(n.trim())),
        TypedValue::Binary(b) => Ok(Cow::Owned(BASE64.encode(b))),
        other => Err(IdentifierError::UnsupportedKeyType {
            table: table.to_string(),
            attribute: attribute.to_string(),
            tag: other.tag(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn keys(pairs: &[(&str, TypedValue)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn s(v: &str) -> TypedValue {
        TypedValue::String(v.into())
    }

    #[test]
    fn test_primary_key_only() {
        let mapping = SchemaMapping::new("Orders2024", "OrderId", None);
        let id = document_id("Orders2024", &keys(&[("OrderId", s("A1"))]), Some(&mapping)).unwrap();
        assert_eq!(id.as_str(), "A1");
        assert!(id.is_deterministic());
    }

    #[test]
    fn test_composite_key_ignores_delivery_order() {
        let mapping = SchemaMapping::new("events", "Device", Some("Day".into()));
        let a = keys(&[("Device", s("d-1")), ("Day", TypedValue::Number("20240101".into()))]);
        let b = keys(&[("Day", TypedValue::Number("20240101".into())), ("Device", s("d-1"))]);

        let id_a = document_id("events", &a, Some(&mapping)).unwrap();
        let id_b = document_id("events", &b, Some(&mapping)).unwrap();
        assert_eq!(id_a.as_str(), "d-1|20240101");
        assert_eq!(id_a, id_b);
    }

    /// Recorder that only tracks the fallback counter
    #[derive(Default)]
    struct FallbackRecorder(Arc<AtomicU64>);

    impl Recorder for FallbackRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            if key.name() == FALLBACK_METRIC {
                Counter::from_arc(self.0.clone())
            } else {
                Counter::noop()
            }
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_fallback_counted_on_every_use() {
        let recorder = FallbackRecorder::default();
        let k = keys(&[("pk", s("1"))]);
        let mapping = SchemaMapping::new("t", "pk", None);

        metrics::with_local_recorder(&recorder, || {
            document_id("t", &k, None).unwrap();
            document_id("t", &k, None).unwrap();
            document_id("t", &k, Some(&mapping)).unwrap();
            // Rejected keys produce no id and are not counted
            document_id("t", &keys(&[("k", TypedValue::Null)]), None).unwrap_err();
        });

        assert_eq!(recorder.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_fallback_joins_in_delivery_order() {
        let k = keys(&[("b", s("2")), ("a", s("1"))]);
        let id = document_id("t", &k, None).unwrap();
        assert_eq!(id.to_string(), "2|1");
        assert!(!id.is_deterministic());
    }

    #[test]
    fn test_binary_key_uses_base64() {
        let mapping = SchemaMapping::new("blobs", "Hash", None);
        let id = document_id(
            "blobs",
            &keys(&[("Hash", TypedValue::Binary(b"hi".to_vec()))]),
            Some(&mapping),
        )
        .unwrap();
        assert_eq!(id.as_str(), "aGk=");
    }

    #[test]
    fn test_missing_mapped_attribute() {
        let mapping = SchemaMapping::new("events", "Device", Some("Day".into()));
        let err = document_id("events", &keys(&[("Device", s("d-1"))]), Some(&mapping)).unwrap_err();
        assert_eq!(
            err,
            IdentifierError::MissingKeyAttribute {
                table: "events".into(),
                attribute: "Day".into(),
            }
        );
    }

    #[test]
    fn test_rejects_empty_and_unsupported_keys() {
        assert!(matches!(
            document_id("t", &AttributeMap::new(), None),
            Err(IdentifierError::EmptyKeys { .. })
        ));
        assert!(matches!(
            document_id("t", &keys(&[("k", TypedValue::Boolean(true))]), None),
            Err(IdentifierError::UnsupportedKeyType { tag: "BOOL", .. })
        ));
    }

    #[test]
    fn test_same_inputs_same_id() {
        let mapping = SchemaMapping::new("t", "pk", None);
        let k = keys(&[("pk", TypedValue::Number("17".into()))]);
        let first = document_id("t", &k, Some(&mapping)).unwrap();
        for _ in 0..3 {
            assert_eq!(document_id("t", &k, Some(&mapping)).unwrap(), first);
        }
    }
}
