//! Event records: the raw form handed over by ingestion and the parsed form the engine reads.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Parsed, immutable user event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub user_id: String,
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Event as received from ingestion. Stored verbatim and validated when a snapshot is built,
/// so a malformed record costs one skipped row rather than a failed computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, alias = "event_name")]
    pub event: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

/// Raw record plus the id assigned when it was appended.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub raw: NewEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing user_id")]
    MissingUserId,
    #[error("missing event name")]
    MissingEventName,
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("unparseable timestamp {0:?}")]
    BadTimestamp(String),
}

impl NewEvent {
    pub fn new(
        user_id: impl Into<String>,
        event: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            event: Some(event.into()),
            timestamp: Some(timestamp.into()),
            properties: None,
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = Some(properties);
        self
    }
}

impl StoredRecord {
    /// Assign a fresh id to an incoming record.
    pub fn assign(raw: NewEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            raw,
        }
    }

    pub fn parse(&self) -> Result<Event, RecordError> {
        let user_id = non_blank(self.raw.user_id.as_deref()).ok_or(RecordError::MissingUserId)?;
        let event_name =
            non_blank(self.raw.event.as_deref()).ok_or(RecordError::MissingEventName)?;
        let ts_raw = self
            .raw
            .timestamp
            .as_deref()
            .ok_or(RecordError::MissingTimestamp)?;
        let timestamp =
            parse_timestamp(ts_raw).ok_or_else(|| RecordError::BadTimestamp(ts_raw.to_string()))?;
        // Non-object property payloads carry no keys and are treated as absent.
        let properties = match &self.raw.properties {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        Ok(Event {
            id: self.id.clone(),
            user_id: user_id.to_string(),
            event_name: event_name.to_string(),
            timestamp,
            properties,
        })
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Accepts RFC 3339, naive `YYYY-MM-DD[ T]HH:MM:SS[.fff]` (read as UTC) and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_formats() {
        let want = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T12:30:00Z"), Some(want));
        assert_eq!(parse_timestamp("2024-03-01T14:30:00+02:00"), Some(want));
        assert_eq!(parse_timestamp("2024-03-01 12:30:00"), Some(want));
        assert_eq!(parse_timestamp(" 2024-03-01T12:30:00 "), Some(want));
        assert_eq!(
            parse_timestamp("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert!(parse_timestamp("2024-03-01 12:30:00.250").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn corrupt_records_are_rejected() {
        let missing_user = StoredRecord::assign(NewEvent {
            user_id: Some("  ".into()),
            event: Some("visit".into()),
            timestamp: Some("2024-01-01".into()),
            properties: None,
        });
        assert_eq!(missing_user.parse(), Err(RecordError::MissingUserId));

        let bad_ts = StoredRecord::assign(NewEvent::new("u1", "visit", "not a date"));
        assert_eq!(
            bad_ts.parse(),
            Err(RecordError::BadTimestamp("not a date".into()))
        );

        let no_ts = StoredRecord::assign(NewEvent {
            timestamp: None,
            ..NewEvent::new("u1", "visit", "")
        });
        assert_eq!(no_ts.parse(), Err(RecordError::MissingTimestamp));
    }

    #[test]
    fn properties_object_is_kept() {
        let rec = StoredRecord::assign(
            NewEvent::new("u1", "signup", "2024-01-01T00:00:00Z")
                .with_properties(serde_json::json!({"plan": "pro", "seats": 3})),
        );
        let ev = rec.parse().unwrap();
        assert_eq!(ev.user_id, "u1");
        assert_eq!(ev.properties.len(), 2);

        let odd = StoredRecord::assign(
            NewEvent::new("u1", "signup", "2024-01-01T00:00:00Z")
                .with_properties(serde_json::json!([1, 2])),
        );
        assert!(odd.parse().unwrap().properties.is_empty());
    }

    #[test]
    fn event_name_alias_accepted() {
        let ev: NewEvent = serde_json::from_str(
            r#"{"user_id":"u1","event_name":"visit","timestamp":"2024-01-01"}"#,
        )
        .unwrap();
        assert_eq!(ev.event.as_deref(), Some("visit"));
    }
}
