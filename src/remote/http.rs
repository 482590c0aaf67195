use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::{Backend, ItineraryAction, ItineraryUpdate, RemoteError, RemoteResult};
use crate::model::{SessionSnapshot, SessionSummary, ShortlistItem, TrackingSession};

/// [`Backend`] over JSON-over-HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::InvalidUrl(format!("'{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(format!("'{}' cannot be a base", base_url)));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Append `segments` to the base path. Each segment is percent-encoded,
    /// so ids containing `/`, `?` or spaces stay a single path segment.
    fn url(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// POST `body` as JSON; any non-2xx status becomes [`RemoteError::Status`].
    async fn post<B: Serialize + ?Sized>(&self, segments: &[&str], body: &B) -> RemoteResult<Response> {
        let endpoint = format!("/{}", segments.join("/"));
        debug!("POST {}", endpoint);
        let response = self.client.post(self.url(segments)?).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_session(&self, session_id: &str, user_id: &str) -> RemoteResult<SessionSnapshot> {
        let response = self
            .post(&["chat", session_id], &json!({ "user_id": user_id }))
            .await?;
        Ok(response.json().await?)
    }

    async fn rename_session(&self, session_id: &str, user_id: &str, title: &str) -> RemoteResult<()> {
        self.post(
            &["chat", session_id, "title"],
            &json!({ "user_id": user_id, "title": title }),
        )
        .await?;
        Ok(())
    }

    async fn post_itinerary(
        &self,
        session_id: &str,
        action: ItineraryAction,
        update: &ItineraryUpdate,
    ) -> RemoteResult<()> {
        self.post(&["chat", session_id, action.endpoint()], update)
            .await?;
        Ok(())
    }

    async fn list_sessions(&self, user_id: &str) -> RemoteResult<Vec<SessionSummary>> {
        let response = self
            .post(&["chat", "allSessions"], &json!({ "user_id": user_id }))
            .await?;
        Ok(response.json().await?)
    }

    async fn delete_session(&self, session_id: &str, user_id: &str) -> RemoteResult<()> {
        self.post(&["chat", session_id, "delete"], &json!({ "user_id": user_id }))
            .await?;
        Ok(())
    }

    async fn upload_tracking(&self, batch: &TrackingSession) -> RemoteResult<()> {
        self.post(&["recommend", "tracking"], batch).await?;
        Ok(())
    }

    async fn enrich_place(&self, place_name: &str) -> RemoteResult<ShortlistItem> {
        let response = self
            .post(&["recommend", "enrich"], &json!({ "place_name": place_name }))
            .await?;
        Ok(response.json().await?)
    }

    async fn save_consent(&self, user_id: &str, consent_hash: &str) -> RemoteResult<()> {
        self.post(
            &["survey", "save-consent"],
            &json!({ "user_id": user_id, "consent_hash": consent_hash }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(base, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_url_joining() {
        let backend = backend("http://localhost:8000/");
        assert_eq!(backend.base_url(), "http://localhost:8000/");
        assert_eq!(
            backend.url(&["chat", "abc"]).unwrap().as_str(),
            "http://localhost:8000/chat/abc"
        );
        assert_eq!(
            backend.url(&["chat", "allSessions"]).unwrap().as_str(),
            "http://localhost:8000/chat/allSessions"
        );
    }

    #[test]
    fn test_url_keeps_base_path() {
        let backend = backend("http://localhost:8000/api");
        assert_eq!(
            backend.url(&["recommend", "tracking"]).unwrap().as_str(),
            "http://localhost:8000/api/recommend/tracking"
        );
    }

    #[test]
    fn test_session_id_is_one_encoded_segment() {
        let backend = backend("http://localhost:8000");
        assert_eq!(
            backend.url(&["chat", "a/b c?x", "delete"]).unwrap().as_str(),
            "http://localhost:8000/chat/a%2Fb%20c%3Fx/delete"
        );
    }

    #[test]
    fn test_rejects_unusable_base() {
        assert!(matches!(
            HttpBackend::new("not a url", Duration::from_secs(1)),
            Err(RemoteError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpBackend::new("mailto:trips@example.com", Duration::from_secs(1)),
            Err(RemoteError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_itinerary_endpoints() {
        assert_eq!(ItineraryAction::Save.endpoint(), "saveItinerary");
        assert_eq!("UPDATE".parse::<ItineraryAction>(), Ok(ItineraryAction::Update));
        assert!("drop".parse::<ItineraryAction>().is_err());
    }
}
