//! Reversible escaping of field names that collide with search-engine
//! metadata fields.
//!
//! Let `R` be the reserved names (`_id`, `_source`, ...). The escapable
//! family is every name made of zero or more extra underscores followed by a
//! member of `R` (`_id`, `__id`, `___id`, ...). Escaping prepends one
//! underscore to members of that family and leaves every other name alone;
//! unescaping strips it again. Because the family is closed under adding an
//! underscore, the mapping is a bijection and an escaped name never lands in
//! `R`.

use std::borrow::Cow;

/// Metadata field names reserved by Elasticsearch / OpenSearch
pub const RESERVED_FIELD_NAMES: &[&str] = &[
    "_uid",
    "_id",
    "_type",
    "_source",
    "_all",
    "_parent",
    "_fieldnames",
    "_field_names",
    "_routing",
    "_index",
    "_size",
    "_timestamp",
    "_ttl",
    "_version",
    "_seq_no",
    "_primary_term",
    "_ignored",
    "_meta",
    "_doc_count",
];

/// True when `name` is a reserved name or a reserved name with extra
/// leading underscores.
pub fn is_escapable(name: &str) -> bool {
    if !name.starts_with('_') {
        return false;
    }
    let stem = name.trim_start_matches('_');
    RESERVED_FIELD_NAMES
        .iter()
        .any(|reserved| &reserved[1..] == stem)
}

/// Escape a source attribute name for use as a document field name
pub fn escape_field_name(name: &str) -> Cow<'_, str> {
    if is_escapable(name) {
        Cow::Owned(format!("_{name}"))
    } else {
        Cow::Borrowed(name)
    }
}

/// Recover the source attribute name from a document field name
pub fn unescape_field_name(name: &str) -> Cow<'_, str> {
    match name.strip_prefix('_') {
        Some(rest) if is_escapable(rest) => Cow::Borrowed(rest),
        _ => Cow::Borrowed(name),
    }
}
