use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceGeo {
    /// `[lat, lng]`
    pub location: (f64, f64),
    /// `[northeast, southwest]`
    pub viewport: ((f64, f64), (f64, f64)),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceReview {
    pub review: String,
    #[serde(rename = "type")]
    pub source: u8,
}

/// Rich details fetched after a place is first shortlisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommend_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekday_text: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ratings: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviews: Vec<PlaceReview>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pros: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice_trip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_level: Option<u8>,
}

/// A recommended or shortlisted place. `name` is the identity used for
/// shortlist membership; `place_id` is carried but never used as a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortlistItem {
    pub name: String,
    /// `city` or `attraction` today; any other value is kept verbatim.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    /// Parent city when `kind` is an attraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<PlaceInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_items: Vec<ShortlistItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<PlaceGeo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Fields this client does not model, kept so they survive a round trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ShortlistItem {
    #[cfg(test)]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            place_id: None,
            city: None,
            description: None,
            tags: Vec::new(),
            info: None,
            sub_items: Vec::new(),
            photos: Vec::new(),
            geometry: None,
            updated_time: None,
            status: None,
            extra: Map::new(),
        }
    }

    /// Shallow JSON merge: every key in `patch` replaces the same key here.
    /// The name is never changed by a patch.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), serde_json::Error> {
        let mut value = serde_json::to_value(&*self)?;
        if let Value::Object(fields) = &mut value {
            for (key, v) in patch {
                if key != "name" {
                    fields.insert(key.clone(), v.clone());
                }
            }
        }
        *self = serde_json::from_value(value)?;
        Ok(())
    }
}
