//! Error types for tablesync-core
//!
//! Errors never carry attribute *values*, only attribute paths, table names
//! and type tags, so they are safe to log at any level.

use std::fmt;

/// Result type alias for decoding operations
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Failure to turn a wire record or attribute into a plain value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Tag outside the closed set of attribute types
    #[error("unknown attribute type tag '{tag}' at {path}")]
    UnknownType { tag: String, path: String },

    /// Node is not a single-tag object, or the payload has the wrong shape
    #[error("malformed attribute at {path}: {reason}")]
    Malformed { path: String, reason: String },

    /// Number is not a finite decimal
    #[error("invalid number at {path}")]
    InvalidNumber { path: String },

    /// Binary payload is not valid base64
    #[error("invalid base64 binary at {path}")]
    InvalidBinary { path: String },

    /// Insert or modify record without a new image
    #[error("{operation} record has no new image")]
    MissingImage { operation: String },

    /// Record operation outside INSERT / MODIFY / REMOVE
    #[error("unknown event name '{0}'")]
    UnknownEventName(String),

    /// Record has no source ARN
    #[error("record has no event source ARN")]
    MissingSourceArn,

    /// Source ARN does not name a table stream
    #[error("cannot extract table name from event source ARN '{0}'")]
    InvalidSourceArn(String),
}

impl DecodeError {
    pub(crate) fn malformed(path: &AttributePath<'_>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure to derive a document identifier from a record's keys
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("record for table '{table}' has no key attributes")]
    EmptyKeys { table: String },

    /// A key attribute named by the schema mapping is absent from the record
    #[error("record for table '{table}' is missing key attribute '{attribute}'")]
    MissingKeyAttribute { table: String, attribute: String },

    /// Key attributes must be string, number or binary
    #[error("key attribute '{attribute}' of table '{table}' has unsupported type {tag}")]
    UnsupportedKeyType {
        table: String,
        attribute: String,
        tag: &'static str,
    },
}

/// Failure to parse the key-schema mapping artifact
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("mapping artifact is not valid JSON: {0}")]
    Parse(String),

    /// Entry has neither `PrimaryKey` nor a HASH element in `Table.KeySchema`
    #[error("mapping entry for table '{table}' has no primary key")]
    MissingPrimaryKey { table: String },
}

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        MappingError::Parse(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────
// Attribute paths
// ─────────────────────────────────────────────────────────────────

/// Location of a node inside an image, rendered only when an error is built.
///
/// Displays as `Items[2].price`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AttributePath<'a> {
    Root(&'a str),
    Field(&'a AttributePath<'a>, &'a str),
    Index(&'a AttributePath<'a>, usize),
}

impl<'a> AttributePath<'a> {
    pub(crate) fn field(&'a self, name: &'a str) -> AttributePath<'a> {
        AttributePath::Field(self, name)
    }

    pub(crate) fn index(&'a self, index: usize) -> AttributePath<'a> {
        AttributePath::Index(self, index)
    }
}

impl fmt::Display for AttributePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributePath::Root(name) => write!(f, "{name}"),
            AttributePath::Field(parent, name) => write!(f, "{parent}.{name}"),
            AttributePath::Index(parent, index) => write!(f, "{parent}[{index}]"),
        }
    }
}
