use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Click,
    View,
    Shortlist,
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "click" => Ok(EventKind::Click),
            "view" => Ok(EventKind::View),
            "shortlist" => Ok(EventKind::Shortlist),
            other => Err(format!("Unknown event type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEvent {
    pub place_name: String,
    pub event_type: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
}

/// The batch uploaded to `/recommend/tracking`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub events: Vec<TrackEvent>,
}

impl TrackingSession {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parse() {
        assert_eq!("Click".parse::<EventKind>(), Ok(EventKind::Click));
        assert_eq!("shortlist".parse::<EventKind>(), Ok(EventKind::Shortlist));
        assert!("hover".parse::<EventKind>().unwrap_err().contains("hover"));
    }
}
