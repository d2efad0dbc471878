//! Fetch outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Fetched payload - a single object or an ordered collection of records.
///
/// The engine never inspects payload content; interpretation belongs to the
/// caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Records(Vec<serde_json::Value>),
    Single(serde_json::Value),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Records(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_values(self) -> Vec<serde_json::Value> {
        match self {
            Self::Single(v) => vec![v],
            Self::Records(v) => v,
        }
    }

    /// Serialized size, used for transfer accounting.
    pub fn byte_size(&self) -> u64 {
        serde_json::to_vec(self).map(|v| v.len() as u64).unwrap_or(0)
    }
}

/// Outcome of a single fetch operation.
///
/// Expected failures surface here as `success = false` with a populated
/// error kind; callers inspect the field instead of catching faults.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub success: bool,
    pub payload: Option<Payload>,
    /// Cost incurred by this fetch, USD.
    pub cost: f64,
    /// Bytes transferred.
    pub bytes: u64,
    pub sent_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub error: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

impl FetchResult {
    pub fn ok(payload: Payload, bytes: u64, cost: f64, sent_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            cost,
            bytes,
            sent_at,
            received_at: Some(Utc::now()),
            error: None,
            error_detail: None,
        }
    }

    pub fn err(kind: ErrorKind, detail: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            payload: None,
            cost: 0.0,
            bytes: 0,
            sent_at,
            received_at: None,
            error: Some(kind),
            error_detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_deserializes_as_records() {
        let payload: Payload = serde_json::from_str(r#"[{"url": "a"}, {"url": "b"}]"#).unwrap();
        assert!(matches!(payload, Payload::Records(_)));
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn object_deserializes_as_single() {
        let payload: Payload = serde_json::from_str(r#"{"url": "a"}"#).unwrap();
        assert!(matches!(payload, Payload::Single(_)));
        assert_eq!(payload.len(), 1);
    }

    #[test]
    fn into_values_flattens() {
        let single = Payload::Single(serde_json::json!("page"));
        assert_eq!(single.into_values(), vec![serde_json::json!("page")]);

        let records = Payload::Records(vec![serde_json::json!(1), serde_json::json!(2)]);
        assert_eq!(records.into_values().len(), 2);
    }

    #[test]
    fn byte_size_matches_serialized_form() {
        let payload = Payload::Records(vec![serde_json::json!({"url": "a"})]);
        assert_eq!(payload.byte_size(), r#"[{"url":"a"}]"#.len() as u64);
    }

    #[test]
    fn ok_result_carries_no_error() {
        let result = FetchResult::ok(
            Payload::Single(serde_json::json!("html")),
            1024,
            0.01,
            Utc::now(),
        );
        assert!(result.success);
        assert!(result.received_at.is_some());
        assert!(result.error.is_none());
        assert_eq!(result.bytes, 1024);
    }

    #[test]
    fn err_result_carries_kind_and_detail() {
        let result = FetchResult::err(ErrorKind::Timeout, "budget exhausted", Utc::now());
        assert!(!result.success);
        assert!(result.payload.is_none());
        assert_eq!(result.cost, 0.0);
        assert_eq!(result.error, Some(ErrorKind::Timeout));
        assert_eq!(result.error_detail.as_deref(), Some("budget exhausted"));
    }
}
