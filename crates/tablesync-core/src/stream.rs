//! Wire envelope of a change-stream batch and the partial-failure response.
//!
//! Records keep their attribute nodes as raw JSON so that one malformed
//! record fails on its own, in delivery position, instead of rejecting the
//! whole envelope at parse time.

use crate::error::DecodeError;
use crate::record::{ChangeRecord, Operation};
use crate::value::{parse_image, AttributeMap};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// `arn:aws:dynamodb:<region>:<account>:table/<name>/stream/<label>`
static TABLE_ARN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:dynamodb:[^:]*:[^:]*:table/([0-9A-Za-z_-]+)/.+$")
        .expect("invalid table ARN regex")
});

/// Raw attribute nodes keyed by attribute name
pub type WireImage = IndexMap<String, Value>;

/// One delivered batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

/// One delivered record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "eventID", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(
        rename = "eventSourceARN",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub event_source_arn: Option<String>,
    #[serde(rename = "awsRegion", default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(rename = "dynamodb")]
    pub change: StreamChange,
}

/// Row payload of a delivered record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamChange {
    #[serde(default)]
    pub keys: WireImage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<WireImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<WireImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_view_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_creation_date_time: Option<f64>,
}

impl StreamRecord {
    pub fn sequence_number(&self) -> Option<&str> {
        self.change.sequence_number.as_deref()
    }

    /// Decode into a typed [`ChangeRecord`]
    pub fn to_change_record(&self) -> Result<ChangeRecord, DecodeError> {
        let operation: Operation = self.event_name.parse()?;
        let arn = self
            .event_source_arn
            .as_deref()
            .ok_or(DecodeError::MissingSourceArn)?;
        let source_table = table_from_source_arn(arn)?;

        let image = |raw: &Option<WireImage>| -> Result<Option<AttributeMap>, DecodeError> {
            raw.as_ref().map(|m| parse_image(m)).transpose()
        };

        Ok(ChangeRecord {
            operation,
            source_table,
            keys: parse_image(&self.change.keys)?,
            new_image: image(&self.change.new_image)?,
            old_image: image(&self.change.old_image)?,
            event_id: self.event_id.clone(),
            sequence_number: self.change.sequence_number.clone(),
        })
    }
}

/// Extract the table name from a stream ARN
pub fn table_from_source_arn(arn: &str) -> Result<String, DecodeError> {
    TABLE_ARN_REGEX
        .captures(arn)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| DecodeError::InvalidSourceArn(arn.to_string()))
}

/// Partial-failure response: the records the host must redeliver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

impl BatchResponse {
    pub fn from_identifiers(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            batch_item_failures: ids
                .into_iter()
                .map(|item_identifier| BatchItemFailure { item_identifier })
                .collect(),
        }
    }

    /// True when every record of the batch was applied
    pub fn is_complete(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypedValue;
    use serde_json::json;

    const ARN: &str =
        "arn:aws:dynamodb:eu-west-1:123456789012:table/Orders2024/stream/2024-01-01T00:00:00.000";

    #[test]
    fn test_table_from_arn() {
        assert_eq!(table_from_source_arn(ARN).unwrap(), "Orders2024");
        assert_eq!(
            table_from_source_arn("arn:aws-cn:dynamodb:cn-north-1:1:table/my_table-2/stream/x")
                .unwrap(),
            "my_table-2"
        );
        assert!(matches!(
            table_from_source_arn("arn:aws:s3:::bucket"),
            Err(DecodeError::InvalidSourceArn(_))
        ));
        assert!(table_from_source_arn("arn:aws:dynamodb:r:a:table/NoStream").is_err());
    }

    #[test]
    fn test_parse_envelope() {
        let event: StreamEvent = serde_json::from_value(json!({
            "Records": [{
                "eventID": "e1",
                "eventName": "INSERT",
                "eventSource": "aws:dynamodb",
                "eventSourceARN": ARN,
                "dynamodb": {
                    "Keys": {"OrderId": {"S": "A1"}},
                    "NewImage": {"OrderId": {"S": "A1"}, "Total": {"N": "42.5"}},
                    "SequenceNumber": "100",
                    "SizeBytes": 26,
                    "StreamViewType": "NEW_AND_OLD_IMAGES"
                }
            }]
        }))
        .unwrap();

        let record = event.records[0].to_change_record().unwrap();
        assert_eq!(record.operation, Operation::Insert);
        assert_eq!(record.source_table, "Orders2024");
        assert_eq!(record.keys["OrderId"], TypedValue::String("A1".into()));
        assert_eq!(
            record.new_image.as_ref().unwrap()["Total"],
            TypedValue::Number("42.5".into())
        );
        assert_eq!(record.sequence_number.as_deref(), Some("100"));
        assert_eq!(record.event_id.as_deref(), Some("e1"));
    }

    #[test]
    fn test_bad_record_fails_alone() {
        let event: StreamEvent = serde_json::from_value(json!({
            "Records": [
                {"eventName": "REMOVE", "eventSourceARN": ARN,
                 "dynamodb": {"Keys": {"OrderId": {"S": "A1"}}}},
                {"eventName": "INSERT", "eventSourceARN": ARN,
                 "dynamodb": {"Keys": {"OrderId": {"Q": "?"}}}}
            ]
        }))
        .unwrap();

        assert!(event.records[0].to_change_record().is_ok());
        assert!(matches!(
            event.records[1].to_change_record(),
            Err(DecodeError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_missing_arn_and_unknown_event() {
        let record: StreamRecord = serde_json::from_value(json!({
            "eventName": "TTL", "eventSourceARN": ARN, "dynamodb": {}
        }))
        .unwrap();
        assert_eq!(
            record.to_change_record().unwrap_err(),
            DecodeError::UnknownEventName("TTL".into())
        );

        let record: StreamRecord =
            serde_json::from_value(json!({"eventName": "REMOVE", "dynamodb": {}})).unwrap();
        assert_eq!(
            record.to_change_record().unwrap_err(),
            DecodeError::MissingSourceArn
        );
    }

    #[test]
    fn test_batch_response_wire_format() {
        let response = BatchResponse::from_identifiers(["7".to_string(), "8".to_string()]);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"batchItemFailures": [{"itemIdentifier": "7"}, {"itemIdentifier": "8"}]})
        );
        assert!(BatchResponse::default().is_complete());
    }
}
