//! Row-level change records.

use crate::error::DecodeError;
use crate::value::AttributeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of row mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Modify,
    Remove,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Modify => "MODIFY",
            Operation::Remove => "REMOVE",
        }
    }

    /// Whether this operation writes a document (as opposed to deleting one)
    pub fn is_upsert(&self) -> bool {
        matches!(self, Operation::Insert | Operation::Modify)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Operation::Insert),
            "MODIFY" => Ok(Operation::Modify),
            "REMOVE" => Ok(Operation::Remove),
            other => Err(DecodeError::UnknownEventName(other.to_string())),
        }
    }
}

/// One row mutation, decoded into typed attributes
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub operation: Operation,
    pub source_table: String,
    pub keys: AttributeMap,
    pub new_image: Option<AttributeMap>,
    pub old_image: Option<AttributeMap>,
    pub event_id: Option<String>,
    /// Position in the partition; identifies the record in partial-failure
    /// reports
    pub sequence_number: Option<String>,
}

impl ChangeRecord {
    /// The image to index for inserts and modifies
    pub fn upsert_image(&self) -> Result<&AttributeMap, DecodeError> {
        self.new_image
            .as_ref()
            .ok_or_else(|| DecodeError::MissingImage {
                operation: self.operation.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_parse() {
        assert_eq!("INSERT".parse::<Operation>().unwrap(), Operation::Insert);
        assert_eq!("MODIFY".parse::<Operation>().unwrap(), Operation::Modify);
        assert_eq!("REMOVE".parse::<Operation>().unwrap(), Operation::Remove);
        assert_eq!(
            "insert".parse::<Operation>().unwrap_err(),
            DecodeError::UnknownEventName("insert".into())
        );
        assert!(Operation::Modify.is_upsert());
        assert!(!Operation::Remove.is_upsert());
    }

    #[test]
    fn test_missing_new_image() {
        let record = ChangeRecord {
            operation: Operation::Modify,
            source_table: "t".into(),
            keys: AttributeMap::new(),
            new_image: None,
            old_image: None,
            event_id: None,
            sequence_number: None,
        };
        assert_eq!(
            record.upsert_image().unwrap_err().to_string(),
            "MODIFY record has no new image"
        );
    }
}
