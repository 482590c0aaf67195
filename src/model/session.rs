use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::chat::{ChatTurn, ShortTermProfile};
use super::place::ShortlistItem;

/// One row of the user's session list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub update_time: DateTime<Utc>,
}

/// Response body of `POST /chat/{session_id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub short_term_profile: Option<ShortTermProfile>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub shortlist: Vec<ShortlistItem>,
}

/// Accepts RFC 3339 as well as offset-less ISO timestamps, which are read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_summary_timestamp_formats() {
        let with_offset: SessionSummary = serde_json::from_value(json!({
            "session_id": "a", "title": "Paris", "update_time": "2024-05-01T09:00:00+02:00"
        }))
        .unwrap();
        assert_eq!(with_offset.update_time, Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap());

        let naive: SessionSummary = serde_json::from_value(json!({
            "session_id": "b", "title": "Rome", "update_time": "2024-05-01T09:00:00.250000"
        }))
        .unwrap();
        assert_eq!(naive.update_time.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn test_snapshot_defaults() {
        let snapshot: SessionSnapshot = serde_json::from_value(json!({})).unwrap();
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.title.is_none());
    }
}
