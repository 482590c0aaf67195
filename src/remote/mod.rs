//! Contracts of the remote trip-planner service.
//!
//! Everything the sync engine needs from the network goes through
//! [`Backend`], so the engine can be driven against [`HttpBackend`] in
//! production and an in-memory fake in tests.

pub mod http;

#[cfg(test)]
pub mod fake;

use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::model::{DailyItinerary, SessionSnapshot, SessionSummary, ShortlistItem, TrackingSession};

pub use http::HttpBackend;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Which itinerary endpoint an edit goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItineraryAction {
    Save,
    Update,
}

impl FromStr for ItineraryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "save" => Ok(ItineraryAction::Save),
            "update" => Ok(ItineraryAction::Update),
            other => Err(format!("Unknown itinerary action '{}'", other)),
        }
    }
}

impl ItineraryAction {
    pub fn endpoint(&self) -> &'static str {
        match self {
            ItineraryAction::Save => "saveItinerary",
            ItineraryAction::Update => "updateItinerary",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItineraryUpdate {
    pub user_id: String,
    pub itinerary: Vec<DailyItinerary>,
    pub chat_idx: usize,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /chat/{session_id}`
    async fn fetch_session(&self, session_id: &str, user_id: &str) -> RemoteResult<SessionSnapshot>;

    /// `POST /chat/{session_id}/title`
    async fn rename_session(&self, session_id: &str, user_id: &str, title: &str) -> RemoteResult<()>;

    /// `POST /chat/{session_id}/saveItinerary` or `/updateItinerary`
    async fn post_itinerary(
        &self,
        session_id: &str,
        action: ItineraryAction,
        update: &ItineraryUpdate,
    ) -> RemoteResult<()>;

    /// `POST /chat/allSessions`
    async fn list_sessions(&self, user_id: &str) -> RemoteResult<Vec<SessionSummary>>;

    /// `POST /chat/{session_id}/delete`
    async fn delete_session(&self, session_id: &str, user_id: &str) -> RemoteResult<()>;

    /// `POST /recommend/tracking`
    async fn upload_tracking(&self, batch: &TrackingSession) -> RemoteResult<()>;

    /// `POST /recommend/enrich`
    async fn enrich_place(&self, place_name: &str) -> RemoteResult<ShortlistItem>;

    /// `POST /survey/save-consent`
    async fn save_consent(&self, user_id: &str, consent_hash: &str) -> RemoteResult<()>;
}
