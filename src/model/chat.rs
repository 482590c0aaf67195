use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::place::ShortlistItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "ai")]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub step_mode: String,
    pub step_duration: String,
    #[serde(default)]
    pub departure_stop: Option<String>,
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default)]
    pub arrival_stop: Option<String>,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub transit_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardProps {
    #[serde(default)]
    pub opening_hours: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A place dropped from a day plan, with its expected visit length in hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardPlace {
    pub name: String,
    pub duration: f64,
    #[serde(rename = "extendedProps")]
    pub extended_props: DiscardProps,
}

/// One slot of a multi-day itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyItinerary {
    pub date: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub place_name: Option<String>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub commute_mode: Option<String>,
    #[serde(default)]
    pub route_steps: Option<Vec<RouteStep>>,
    #[serde(default)]
    pub discarded_places: Vec<DiscardPlace>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<ShortlistItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populars: Option<Vec<ShortlistItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub itinerary: Option<Vec<DailyItinerary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub message: ChatMessage,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            message: ChatMessage {
                content: Some(content.into()),
                ..Default::default()
            },
        }
    }

    #[cfg(test)]
    pub fn assistant(message: ChatMessage) -> Self {
        Self {
            role: Role::Assistant,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagWeight {
    pub tag: String,
    pub weight: f64,
    /// Number of consecutive sessions the tag has been mentioned in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_sessions: Option<u32>,
}

/// Preferences inferred from the current conversation only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShortTermProfile {
    #[serde(default)]
    pub preferences: BTreeMap<String, TagWeight>,
    #[serde(default)]
    pub avoids: Vec<String>,
}
