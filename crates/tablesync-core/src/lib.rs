//! # tablesync-core: Change Record Transformation
//!
//! Pure building blocks for mirroring a table change stream into a search
//! index. Nothing in this crate performs I/O.
//!
//! - [`value`]: the closed set of tagged attribute types and wire parsing
//! - [`decoder`]: typed attributes to plain JSON documents
//! - [`escape`]: reversible escaping of reserved metadata field names
//! - [`identifier`]: deterministic document ids from record keys
//! - [`mapping`]: table key-schema mappings
//! - [`stream`]: batch envelope, source table extraction, partial-failure
//!   response
//!
//! ## Example
//!
//! ```rust
//! use tablesync_core::{decode_image, document_id, SchemaMapping, StreamRecord};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let record: StreamRecord = serde_json::from_str(r#"{
//!     "eventName": "INSERT",
//!     "eventSourceARN": "arn:aws:dynamodb:us-east-1:1:table/Orders2024/stream/x",
//!     "dynamodb": {
//!         "Keys": {"OrderId": {"S": "A1"}},
//!         "NewImage": {"OrderId": {"S": "A1"}, "Total": {"N": "42.5"}}
//!     }
//! }"#)?;
//!
//! let change = record.to_change_record()?;
//! let mapping = SchemaMapping::new("Orders2024", "OrderId", None);
//! let id = document_id(&change.source_table, &change.keys, Some(&mapping))?;
//! let body = decode_image(change.upsert_image()?)?;
//!
//! assert_eq!(id.as_str(), "A1");
//! assert_eq!(body["Total"], 42.5);
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod error;
pub mod escape;
pub mod identifier;
pub mod mapping;
pub mod record;
pub mod stream;
pub mod value;

pub use decoder::{decode_image, decode_value};
pub use error::{DecodeError, DecodeResult, IdentifierError, MappingError};
pub use escape::{escape_field_name, unescape_field_name, RESERVED_FIELD_NAMES};
pub use identifier::{document_id, DocumentId, FALLBACK_METRIC, ID_DELIMITER};
pub use mapping::{SchemaMapping, SchemaMappingStore};
pub use record::{ChangeRecord, Operation};
pub use stream::{
    table_from_source_arn, BatchItemFailure, BatchResponse, StreamChange, StreamEvent,
    StreamRecord,
};
pub use value::{AttributeMap, TypedValue};
