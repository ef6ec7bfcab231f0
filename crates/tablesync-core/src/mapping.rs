//! Key-schema mapping: which attributes form a table's primary key.
//!
//! The mapping artifact is a JSON object keyed by table name:
//!
//! ```json
//! {
//!   "orders": { "PrimaryKey": "OrderId", "SortKey": "CreatedAt" },
//!   "users":  { "Table": { "KeySchema": [
//!       { "AttributeName": "UserId", "KeyType": "HASH" }
//!   ] } }
//! }
//! ```
//!
//! Entries may carry the full table description next to the key names;
//! everything except `PrimaryKey`, `SortKey` and `Table.KeySchema` is
//! ignored. When `PrimaryKey` is absent the key names come from the
//! `HASH` / `RANGE` elements of the key schema.

use crate::error::MappingError;
use serde::Deserialize;
use std::collections::HashMap;

/// Key attributes of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMapping {
    pub table: String,
    pub primary_key: String,
    pub sort_key: Option<String>,
}

impl SchemaMapping {
    pub fn new(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        sort_key: Option<String>,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            sort_key,
        }
    }
}

/// Read-only table name → [`SchemaMapping`] cache.
///
/// Lookups try the exact table name first and then fall back to a
/// case-insensitive match, since published artifacts commonly use
/// lowercased table names.
#[derive(Debug, Clone, Default)]
pub struct SchemaMappingStore {
    entries: HashMap<String, SchemaMapping>,
    folded: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ArtifactEntry {
    #[serde(rename = "PrimaryKey", default)]
    primary_key: Option<String>,
    #[serde(rename = "SortKey", default)]
    sort_key: Option<String>,
    #[serde(rename = "Table", default)]
    table: Option<TableDescription>,
}

#[derive(Debug, Deserialize)]
struct TableDescription {
    #[serde(rename = "KeySchema", default)]
    key_schema: Vec<KeySchemaElement>,
}

#[derive(Debug, Deserialize)]
struct KeySchemaElement {
    #[serde(rename = "AttributeName")]
    attribute_name: String,
    #[serde(rename = "KeyType")]
    key_type: String,
}

impl ArtifactEntry {
    fn into_mapping(self, table: String) -> Result<SchemaMapping, MappingError> {
        let key_of = |kind: &str| {
            self.table.as_ref().and_then(|t| {
                t.key_schema
                    .iter()
                    .find(|e| e.key_type.eq_ignore_ascii_case(kind))
                    .map(|e| e.attribute_name.clone())
            })
        };

        let primary_key = non_empty(self.primary_key.clone())
            .or_else(|| key_of("HASH"))
            .ok_or_else(|| MappingError::MissingPrimaryKey {
                table: table.clone(),
            })?;
        let sort_key = match non_empty(self.primary_key.clone()) {
            Some(_) => non_empty(self.sort_key.clone()),
            None => key_of("RANGE"),
        };

        Ok(SchemaMapping {
            table,
            primary_key,
            sort_key,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl SchemaMappingStore {
    /// Empty store; every lookup misses
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from explicit mappings
    pub fn from_mappings(mappings: impl IntoIterator<Item = SchemaMapping>) -> Self {
        let mut store = Self::default();
        for mapping in mappings {
            store.insert(mapping);
        }
        store
    }

    /// Parse a mapping artifact
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, MappingError> {
        let raw: HashMap<String, ArtifactEntry> = serde_json::from_slice(bytes)?;
        let mut store = Self::default();
        for (table, entry) in raw {
            store.insert(entry.into_mapping(table)?);
        }
        Ok(store)
    }

    fn insert(&mut self, mapping: SchemaMapping) {
        self.folded
            .entry(mapping.table.to_lowercase())
            .or_insert_with(|| mapping.table.clone());
        self.entries.insert(mapping.table.clone(), mapping);
    }

    /// Look up the mapping for a table
    pub fn get(&self, table: &str) -> Option<&SchemaMapping> {
        self.entries.get(table).or_else(|| {
            self.folded
                .get(&table.to_lowercase())
                .and_then(|exact| self.entries.get(exact))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Table names with a mapping, sorted
    pub fn tables(&self) -> Vec<&str> {
        let mut tables: Vec<_> = self.entries.keys().map(String::as_str).collect();
        tables.sort_unstable();
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_names() {
        let store = SchemaMappingStore::from_json_slice(
            br#"{
                "orders": {"PrimaryKey": "OrderId", "SortKey": "CreatedAt"},
                "users": {"PrimaryKey": "UserId", "SortKey": ""}
            }"#,
        )
        .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("orders"),
            Some(&SchemaMapping::new("orders", "OrderId", Some("CreatedAt".into())))
        );
        assert_eq!(store.get("users").unwrap().sort_key, None);
    }

    #[test]
    fn test_parse_key_schema_from_table_description() {
        let store = SchemaMappingStore::from_json_slice(
            br#"{
                "events": {
                    "Table": {
                        "TableName": "events",
                        "ItemCount": 12,
                        "KeySchema": [
                            {"AttributeName": "Day", "KeyType": "RANGE"},
                            {"AttributeName": "Device", "KeyType": "HASH"}
                        ]
                    },
                    "ResponseMetadata": {"HTTPStatusCode": 200}
                }
            }"#,
        )
        .unwrap();

        let mapping = store.get("events").unwrap();
        assert_eq!(mapping.primary_key, "Device");
        assert_eq!(mapping.sort_key.as_deref(), Some("Day"));
    }

    #[test]
    fn test_lookup_falls_back_to_case_insensitive() {
        let store = SchemaMappingStore::from_mappings([
            SchemaMapping::new("orders2024", "OrderId", None),
            SchemaMapping::new("Users", "UserId", None),
        ]);
        assert_eq!(store.get("Orders2024").unwrap().primary_key, "OrderId");
        assert_eq!(store.get("Users").unwrap().primary_key, "UserId");
        assert_eq!(store.get("users").unwrap().primary_key, "UserId");
        assert!(store.get("missing").is_none());
        assert_eq!(store.tables(), ["Users", "orders2024"]);
    }

    #[test]
    fn test_missing_primary_key_is_error() {
        let err = SchemaMappingStore::from_json_slice(br#"{"t": {"SortKey": "s"}}"#).unwrap_err();
        assert_eq!(err, MappingError::MissingPrimaryKey { table: "t".into() });
    }

    #[test]
    fn test_malformed_artifact() {
        assert!(matches!(
            SchemaMappingStore::from_json_slice(b"[1, 2]"),
            Err(MappingError::Parse(_))
        ));
        assert!(SchemaMappingStore::empty().is_empty());
    }
}
