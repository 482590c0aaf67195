use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Backend, ItineraryAction, ItineraryUpdate, RemoteError, RemoteResult};
use crate::model::{SessionSnapshot, SessionSummary, ShortlistItem, TrackingSession};

/// In-memory [`Backend`] that records every call. Flip `set_failing` to make
/// all endpoints answer 503. Session fetches and uploads suspend before
/// answering so concurrent callers can interleave with them.
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<String>>,
    pub snapshots: Mutex<HashMap<String, SessionSnapshot>>,
    pub sessions: Mutex<Vec<SessionSummary>>,
    pub places: Mutex<HashMap<String, ShortlistItem>>,
    pub uploads: Mutex<Vec<TrackingSession>>,
    fail: AtomicBool,
    upload_delay: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Extra suspensions an upload takes before it lands.
    pub fn set_upload_delay(&self, yields: usize) {
        self.upload_delay.store(yields, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn hit(&self, endpoint: String) -> RemoteResult<()> {
        self.calls.lock().push(endpoint.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                endpoint,
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_session(&self, session_id: &str, _user_id: &str) -> RemoteResult<SessionSnapshot> {
        tokio::task::yield_now().await;
        self.hit(format!("/chat/{}", session_id))?;
        Ok(self
            .snapshots
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn rename_session(&self, session_id: &str, _user_id: &str, _title: &str) -> RemoteResult<()> {
        self.hit(format!("/chat/{}/title", session_id))
    }

    async fn post_itinerary(
        &self,
        session_id: &str,
        action: ItineraryAction,
        _update: &ItineraryUpdate,
    ) -> RemoteResult<()> {
        self.hit(format!("/chat/{}/{}", session_id, action.endpoint()))
    }

    async fn list_sessions(&self, _user_id: &str) -> RemoteResult<Vec<SessionSummary>> {
        self.hit("/chat/allSessions".into())?;
        Ok(self.sessions.lock().clone())
    }

    async fn delete_session(&self, session_id: &str, _user_id: &str) -> RemoteResult<()> {
        self.hit(format!("/chat/{}/delete", session_id))
    }

    async fn upload_tracking(&self, batch: &TrackingSession) -> RemoteResult<()> {
        for _ in 0..=self.upload_delay.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.hit("/recommend/tracking".into())?;
        self.uploads.lock().push(batch.clone());
        Ok(())
    }

    async fn enrich_place(&self, place_name: &str) -> RemoteResult<ShortlistItem> {
        self.hit("/recommend/enrich".into())?;
        Ok(self
            .places
            .lock()
            .get(place_name)
            .cloned()
            .unwrap_or_else(|| ShortlistItem::named(place_name)))
    }

    async fn save_consent(&self, _user_id: &str, _consent_hash: &str) -> RemoteResult<()> {
        self.hit("/survey/save-consent".into())
    }
}
