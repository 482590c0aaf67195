use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::clock::Clock;
use crate::config::{self, session_key, DEFAULT_TITLE};
use crate::model::{ChatTurn, DailyItinerary, Role, SessionSnapshot, ShortTermProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Uninitialized,
    Hydrating,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    session_id: String,
    chat_history: Vec<ChatTurn>,
    short_term_profile: Option<ShortTermProfile>,
    title: String,
    timestamp: DateTime<Utc>,
}

/// Serializable read-only view of the active session.
#[derive(Debug, Serialize)]
pub struct SessionView<'a> {
    pub session_id: Option<&'a str>,
    pub phase: SessionPhase,
    pub title: &'a str,
    pub chat_history: &'a [ChatTurn],
    pub short_term_profile: Option<&'a ShortTermProfile>,
}

/// The active chat session. Every mutation is written through to
/// `session_<id>` before returning.
pub struct SessionStore {
    cache: Cache,
    clock: Arc<dyn Clock>,
    session_id: Option<String>,
    chat_history: Vec<ChatTurn>,
    short_term_profile: Option<ShortTermProfile>,
    title: String,
    phase: SessionPhase,
}

impl SessionStore {
    pub fn new(cache: Cache, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock,
            session_id: None,
            chat_history: Vec::new(),
            short_term_profile: None,
            title: DEFAULT_TITLE.to_string(),
            phase: SessionPhase::Uninitialized,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    #[cfg(test)]
    pub fn chat_history(&self) -> &[ChatTurn] {
        &self.chat_history
    }

    #[cfg(test)]
    pub fn short_term_profile(&self) -> Option<&ShortTermProfile> {
        self.short_term_profile.as_ref()
    }

    pub fn is_ready(&self, id: &str) -> bool {
        self.phase == SessionPhase::Ready && self.session_id.as_deref() == Some(id)
    }

    pub fn is_hydrating(&self, id: &str) -> bool {
        self.phase == SessionPhase::Hydrating && self.session_id.as_deref() == Some(id)
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            session_id: self.session_id.as_deref(),
            phase: self.phase,
            title: &self.title,
            chat_history: &self.chat_history,
            short_term_profile: self.short_term_profile.as_ref(),
        }
    }

    /// Hydrate from `session_<id>` if it exists, parses and was saved inside
    /// the freshness window. Stale records are deleted.
    pub fn load_from_cache(&mut self, id: &str) -> bool {
        let key = session_key(id);
        let Some(record) = self.cache.load::<SessionRecord>(&key) else {
            return false;
        };

        if record.session_id != id {
            warn!("Cache record {} belongs to session {}; discarding", key, record.session_id);
            self.cache.remove(&key);
            return false;
        }

        let age = self.clock.now() - record.timestamp;
        if age >= config::freshness_window() {
            info!("Cached session {} is {}h old; refetching", id, age.num_hours());
            self.cache.remove(&key);
            return false;
        }

        self.session_id = Some(record.session_id);
        self.chat_history = record.chat_history;
        self.short_term_profile = record.short_term_profile;
        self.title = record.title;
        self.phase = SessionPhase::Ready;
        debug!("Hydrated session {} from cache", id);
        true
    }

    /// Switch to `id` and wait for a server snapshot.
    pub fn begin_hydrating(&mut self, id: &str) {
        self.reset();
        self.session_id = Some(id.to_string());
        self.phase = SessionPhase::Hydrating;
    }

    pub fn apply_snapshot(&mut self, snapshot: &SessionSnapshot) {
        self.chat_history = snapshot.messages.clone();
        self.short_term_profile = snapshot.short_term_profile.clone();
        self.title = snapshot
            .title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_string();
        self.phase = SessionPhase::Ready;
        self.save_to_cache();
    }

    pub fn save_to_cache(&self) {
        let Some(id) = &self.session_id else {
            return;
        };
        let record = SessionRecord {
            session_id: id.clone(),
            chat_history: self.chat_history.clone(),
            short_term_profile: self.short_term_profile.clone(),
            title: self.title.clone(),
            timestamp: self.clock.now(),
        };
        self.cache.save(&session_key(id), &record);
    }

    /// Append a user turn. Returns the session id it went to, `None` when no
    /// session is active.
    pub fn send_message(&mut self, text: &str) -> Option<String> {
        self.append_history(ChatTurn::user(text))
    }

    pub fn append_history(&mut self, turn: ChatTurn) -> Option<String> {
        let id = self.session_id.clone()?;
        self.chat_history.push(turn);
        self.save_to_cache();
        Some(id)
    }

    pub fn set_short_term_profile(&mut self, profile: Option<ShortTermProfile>) -> Option<String> {
        let id = self.session_id.clone()?;
        self.short_term_profile = profile;
        self.save_to_cache();
        Some(id)
    }

    pub fn set_title(&mut self, title: &str) -> Option<String> {
        let id = self.session_id.clone()?;
        self.title = title.to_string();
        self.save_to_cache();
        Some(id)
    }

    /// Merge `patch` into the named place of the latest assistant turn that
    /// recommends it. Nothing is persisted when no turn matches.
    pub fn update_recommendation(&mut self, place_name: &str, patch: &Map<String, Value>) -> bool {
        let target = self
            .chat_history
            .iter_mut()
            .rev()
            .filter(|turn| turn.role == Role::Assistant)
            .find_map(|turn| {
                turn.message
                    .recommendations
                    .as_mut()
                    .and_then(|recs| recs.iter_mut().find(|p| p.name == place_name))
            });

        let Some(place) = target else {
            return false;
        };
        if let Err(e) = place.merge_patch(patch) {
            warn!("Rejected patch for recommendation '{}': {}", place_name, e);
            return false;
        }

        self.save_to_cache();
        true
    }

    /// Replace the itinerary carried by the assistant turn at `chat_idx`.
    pub fn set_itinerary(&mut self, chat_idx: usize, itinerary: Vec<DailyItinerary>) -> Option<String> {
        let id = self.session_id.clone()?;
        let turn = self.chat_history.get_mut(chat_idx)?;
        if turn.role != Role::Assistant {
            return None;
        }
        turn.message.itinerary = Some(itinerary);
        self.save_to_cache();
        Some(id)
    }

    /// Reset in-memory state. The persisted record is left alone.
    pub fn clear_session(&mut self) {
        self.reset();
    }

    pub fn clear_local_storage(&self, id: &str) {
        self.cache.remove(&session_key(id));
    }

    fn reset(&mut self) {
        self.session_id = None;
        self.chat_history.clear();
        self.short_term_profile = None;
        self.title = DEFAULT_TITLE.to_string();
        self.phase = SessionPhase::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::testing::ManualClock;
    use crate::model::chat::{ChatMessage, TagWeight};
    use crate::model::ShortlistItem;
    use chrono::Duration;
    use serde_json::json;

    fn setup() -> (SessionStore, Cache, Arc<ManualClock>) {
        let cache = Cache::new(Arc::new(MemoryStore::new()));
        let clock = Arc::new(ManualClock::new());
        (SessionStore::new(cache.clone(), clock.clone()), cache, clock)
    }

    fn ready(store: &mut SessionStore, id: &str) {
        store.begin_hydrating(id);
        store.apply_snapshot(&SessionSnapshot::default());
    }

    fn recommending(names: &[&str]) -> ChatTurn {
        ChatTurn::assistant(ChatMessage {
            recommendations: Some(names.iter().map(|n| ShortlistItem::named(*n)).collect()),
            ..Default::default()
        })
    }

    #[test]
    fn test_round_trip_through_cache() {
        let (mut store, cache, clock) = setup();
        ready(&mut store, "abc");
        store.send_message("Three days in Paris");
        store.append_history(recommending(&["Louvre"]));
        let mut preferences = std::collections::BTreeMap::new();
        preferences.insert(
            "museum".to_string(),
            TagWeight { tag: "museum".into(), weight: 0.8, consecutive_sessions: Some(2) },
        );
        store.set_short_term_profile(Some(ShortTermProfile { preferences, avoids: vec!["nightlife".into()] }));
        store.set_title("Paris");

        let mut reloaded = SessionStore::new(cache, clock);
        assert!(reloaded.load_from_cache("abc"));
        assert_eq!(reloaded.chat_history(), store.chat_history());
        assert_eq!(reloaded.short_term_profile(), store.short_term_profile());
        assert_eq!(reloaded.title(), "Paris");
        assert_eq!(reloaded.phase, SessionPhase::Ready);
    }

    #[test]
    fn test_stale_record_is_discarded() {
        let (mut store, cache, clock) = setup();
        ready(&mut store, "abc");
        store.send_message("hello");

        clock.advance(Duration::hours(24) + Duration::seconds(1));
        let mut reloaded = SessionStore::new(cache.clone(), clock);
        assert!(!reloaded.load_from_cache("abc"));
        assert_eq!(reloaded.phase, SessionPhase::Uninitialized);
        assert!(!cache.contains(&session_key("abc")));
    }

    #[test]
    fn test_missing_or_corrupt_record() {
        let (mut store, cache, _clock) = setup();
        assert!(!store.load_from_cache("nope"));

        cache.put_raw(&session_key("bad"), "[1, 2");
        assert!(!store.load_from_cache("bad"));
        assert!(!cache.contains(&session_key("bad")));
    }

    #[test]
    fn test_mutations_need_active_session() {
        let (mut store, cache, _clock) = setup();
        assert_eq!(store.send_message("hi"), None);
        assert_eq!(store.set_title("x"), None);
        assert!(store.chat_history().is_empty());
        assert!(!cache.contains(&session_key("")));
    }

    #[test]
    fn test_update_recommendation_targets_latest_match() {
        let (mut store, _cache, _clock) = setup();
        ready(&mut store, "abc");
        store.append_history(recommending(&["Louvre", "Orsay"]));
        store.append_history(recommending(&["Louvre"]));

        let patch = json!({"status": "visited"});
        assert!(store.update_recommendation("Louvre", patch.as_object().unwrap()));

        let history = store.chat_history();
        let older = &history[0].message.recommendations.as_ref().unwrap()[0];
        let newer = &history[1].message.recommendations.as_ref().unwrap()[0];
        assert_eq!(older.status, None);
        assert_eq!(newer.status.as_deref(), Some("visited"));
    }

    #[test]
    fn test_update_recommendation_without_match() {
        let (mut store, cache, _clock) = setup();
        store.begin_hydrating("abc");
        store.append_history(ChatTurn::user("Louvre?"));
        let patch = json!({"status": "visited"});
        assert!(!store.update_recommendation("Louvre", patch.as_object().unwrap()));
        // user turns are never patched
        assert_eq!(store.chat_history()[0].message.content.as_deref(), Some("Louvre?"));
        assert!(cache.contains(&session_key("abc")));
    }

    #[test]
    fn test_set_itinerary_only_on_assistant_turn() {
        let (mut store, _cache, _clock) = setup();
        ready(&mut store, "abc");
        store.send_message("plan it");
        store.append_history(ChatTurn::assistant(ChatMessage::default()));

        assert_eq!(store.set_itinerary(0, Vec::new()), None);
        assert_eq!(store.set_itinerary(5, Vec::new()), None);
        assert_eq!(store.set_itinerary(1, Vec::new()), Some("abc".to_string()));
        assert_eq!(store.chat_history()[1].message.itinerary, Some(Vec::new()));
    }

    #[test]
    fn test_clear_session_keeps_cache() {
        let (mut store, cache, _clock) = setup();
        ready(&mut store, "abc");
        store.clear_session();

        assert_eq!(store.session_id(), None);
        assert_eq!(store.title(), DEFAULT_TITLE);
        assert!(cache.contains(&session_key("abc")));

        store.clear_local_storage("abc");
        assert!(!cache.contains(&session_key("abc")));
    }
}
