use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::Cache;
use crate::clock::Clock;
use crate::config::{tracking_key, MIN_VIEW_SECONDS};
use crate::model::{EventKind, TrackEvent, TrackingSession};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackingRecord {
    current_session: Option<TrackingSession>,
    #[serde(default)]
    active_views: Vec<(String, DateTime<Utc>)>,
    saved_at: DateTime<Utc>,
}

/// A batch taken for upload, plus what is needed to settle it afterwards.
#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub batch: TrackingSession,
    session_id: Option<String>,
    epoch: u64,
}

/// Interaction log for one session plus the table of open viewing intervals.
pub struct BehaviorStore {
    cache: Cache,
    clock: Arc<dyn Clock>,
    session_id: Option<String>,
    current: Option<TrackingSession>,
    active_views: IndexMap<String, DateTime<Utc>>,
    pending_upload: bool,
    /// Bumped on teardown so uploads started before it cannot settle state after it.
    epoch: u64,
}

impl BehaviorStore {
    pub fn new(cache: Cache, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock,
            session_id: None,
            current: None,
            active_views: IndexMap::new(),
            pending_upload: false,
            epoch: 0,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn current(&self) -> Option<&TrackingSession> {
        self.current.as_ref()
    }

    pub fn is_uploading(&self) -> bool {
        self.pending_upload
    }

    pub fn is_viewing(&self, place_name: &str) -> bool {
        self.active_views.contains_key(place_name)
    }

    pub fn initialize(&mut self, session_id: &str) {
        self.session_id = Some(session_id.to_string());
        self.current = None;
        self.active_views.clear();

        match self.cache.load::<TrackingRecord>(&tracking_key(session_id)) {
            Some(record) => {
                self.current = record.current_session;
                self.active_views = record.active_views.into_iter().collect();
                debug!(
                    "Hydrated tracking for {}: {} events, {} open views",
                    session_id,
                    self.current.as_ref().map_or(0, |s| s.events.len()),
                    self.active_views.len()
                );
            }
            None => self.persist(),
        }
    }

    /// Open or re-stamp the tracking session. Only runs for an authenticated
    /// user whose active chat session is the one this log belongs to.
    pub fn start_tracking(&mut self, user_id: Option<&str>, active_session: Option<&str>) -> bool {
        let (Some(user_id), Some(active)) = (user_id, active_session) else {
            return false;
        };
        if self.session_id.as_deref() != Some(active) {
            return false;
        }

        match self.current.as_mut() {
            Some(session) => {
                session.user_id = user_id.to_string();
                session.session_id = active.to_string();
            }
            None => self.current = Some(TrackingSession::new(user_id, active)),
        }
        self.persist();
        true
    }

    pub fn record_action(&mut self, kind: EventKind, place_name: &str) -> bool {
        let Some(session) = self.current.as_mut() else {
            return false;
        };
        session.events.push(TrackEvent {
            place_name: place_name.to_string(),
            event_type: kind,
            duration_sec: None,
        });
        self.persist();
        true
    }

    /// Last start wins: an unfinished interval for the same place is replaced.
    pub fn start_viewing(&mut self, place_name: &str) {
        if self.session_id.is_none() {
            return;
        }
        self.active_views.insert(place_name.to_string(), self.clock.now());
        self.persist();
    }

    /// Close the interval for `place_name`. A `view` event is logged only when
    /// the dwell reached [`MIN_VIEW_SECONDS`].
    pub fn end_viewing(&mut self, place_name: &str) -> Option<TrackEvent> {
        let started = self.active_views.shift_remove(place_name)?;
        let dwell = (self.clock.now() - started).num_milliseconds() as f64 / 1000.0;

        let mut recorded = None;
        if dwell >= MIN_VIEW_SECONDS {
            if let Some(session) = self.current.as_mut() {
                let event = TrackEvent {
                    place_name: place_name.to_string(),
                    event_type: EventKind::View,
                    duration_sec: Some(dwell),
                };
                session.events.push(event.clone());
                recorded = Some(event);
            }
        } else {
            debug!("Dropping {:.1}s view of '{}'", dwell, place_name);
        }

        self.persist();
        recorded
    }

    /// Claim the upload slot. `None` if an upload is already in flight or
    /// there is nothing to upload.
    pub fn try_begin_upload(&mut self) -> Option<u64> {
        if self.pending_upload || self.current.is_none() {
            return None;
        }
        self.pending_upload = true;
        Some(self.epoch)
    }

    pub fn finish_upload(&mut self, epoch: u64) {
        if self.epoch == epoch {
            self.pending_upload = false;
        }
    }

    pub fn upload_ticket(&self) -> Option<UploadTicket> {
        Some(UploadTicket {
            batch: self.current.clone()?,
            session_id: self.session_id.clone(),
            epoch: self.epoch,
        })
    }

    /// Settle a successful upload: drop the uploaded events and the cache
    /// entry. Events appended while the request was in flight are kept. If
    /// the store moved to another session meanwhile, the batch is settled
    /// against the cached record of the session it came from.
    pub fn complete_upload(&mut self, ticket: &UploadTicket) {
        if ticket.epoch != self.epoch {
            return;
        }
        let uploaded = ticket.batch.events.len();

        if ticket.session_id != self.session_id {
            if let Some(id) = &ticket.session_id {
                self.settle_detached(id, uploaded);
            }
            return;
        }

        let leftover = match self.current.as_mut() {
            Some(session) if session.events.len() > uploaded => {
                session.events.drain(..uploaded);
                true
            }
            _ => false,
        };

        if !leftover {
            self.current = None;
        }
        if leftover || !self.active_views.is_empty() {
            self.persist();
        } else if let Some(id) = &self.session_id {
            self.cache.remove(&tracking_key(id));
        }
    }

    fn settle_detached(&self, session_id: &str, uploaded: usize) {
        let key = tracking_key(session_id);
        let Some(mut record) = self.cache.load::<TrackingRecord>(&key) else {
            return;
        };

        match record.current_session.as_mut() {
            Some(session) if session.events.len() > uploaded => {
                session.events.drain(..uploaded);
            }
            _ => record.current_session = None,
        }

        if record.current_session.is_none() && record.active_views.is_empty() {
            self.cache.remove(&key);
        } else {
            record.saved_at = self.clock.now();
            self.cache.save(&key, &record);
        }
        debug!("Settled {} uploaded events for detached session {}", uploaded, session_id);
    }

    pub fn clear_behavior(&mut self) {
        self.session_id = None;
        self.current = None;
        self.active_views.clear();
        self.pending_upload = false;
        self.epoch += 1;
    }

    pub fn clear_storage(&self, session_id: &str) {
        self.cache.remove(&tracking_key(session_id));
    }

    pub fn persist(&self) {
        let Some(id) = &self.session_id else {
            return;
        };
        let record = TrackingRecord {
            current_session: self.current.clone(),
            active_views: self
                .active_views
                .iter()
                .map(|(name, started)| (name.clone(), *started))
                .collect(),
            saved_at: self.clock.now(),
        };
        self.cache.save(&tracking_key(id), &record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::testing::ManualClock;

    fn setup() -> (BehaviorStore, Cache, Arc<ManualClock>) {
        let cache = Cache::new(Arc::new(MemoryStore::new()));
        let clock = Arc::new(ManualClock::new());
        let mut store = BehaviorStore::new(cache.clone(), clock.clone());
        store.initialize("abc");
        assert!(store.start_tracking(Some("user-1"), Some("abc")));
        (store, cache, clock)
    }

    fn events(store: &BehaviorStore) -> Vec<TrackEvent> {
        store.current().map(|s| s.events.clone()).unwrap_or_default()
    }

    #[test]
    fn test_start_tracking_rejects_other_session() {
        let cache = Cache::new(Arc::new(MemoryStore::new()));
        let mut store = BehaviorStore::new(cache, Arc::new(ManualClock::new()));
        store.initialize("abc");

        assert!(!store.start_tracking(Some("user-1"), Some("xyz")));
        assert!(!store.start_tracking(None, Some("abc")));
        assert!(store.current().is_none());
    }

    #[test]
    fn test_start_tracking_restamps_existing_log() {
        let (mut store, _cache, _clock) = setup();
        store.record_action(EventKind::Click, "Louvre");
        assert!(store.start_tracking(Some("user-2"), Some("abc")));

        let session = store.current().unwrap();
        assert_eq!(session.user_id, "user-2");
        assert_eq!(session.events.len(), 1);
    }

    #[test]
    fn test_view_below_threshold_is_dropped() {
        let (mut store, _cache, clock) = setup();
        store.start_viewing("Louvre");
        clock.advance_secs_f64(9.9);

        assert_eq!(store.end_viewing("Louvre"), None);
        assert!(events(&store).is_empty());
        assert!(!store.is_viewing("Louvre"));
    }

    #[test]
    fn test_view_at_threshold_is_recorded() {
        let (mut store, _cache, clock) = setup();
        store.start_viewing("Louvre");
        clock.advance_secs_f64(10.0);

        let event = store.end_viewing("Louvre").unwrap();
        assert_eq!(event.event_type, EventKind::View);
        assert!((event.duration_sec.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(events(&store).len(), 1);
    }

    #[test]
    fn test_restarted_view_uses_latest_start() {
        let (mut store, _cache, clock) = setup();
        store.start_viewing("Louvre");
        clock.advance_secs_f64(8.0);
        store.start_viewing("Louvre");
        clock.advance_secs_f64(8.0);

        assert_eq!(store.end_viewing("Louvre"), None);
        assert_eq!(store.end_viewing("Louvre"), None);
    }

    #[test]
    fn test_open_views_survive_reload() {
        let (mut store, cache, clock) = setup();
        store.record_action(EventKind::Shortlist, "Orsay");
        store.start_viewing("Louvre");

        let mut reloaded = BehaviorStore::new(cache, clock.clone());
        reloaded.initialize("abc");
        assert!(reloaded.is_viewing("Louvre"));
        assert_eq!(events(&reloaded).len(), 1);

        clock.advance_secs_f64(12.0);
        assert!(reloaded.end_viewing("Louvre").is_some());
    }

    #[test]
    fn test_upload_slot_is_exclusive() {
        let (mut store, _cache, _clock) = setup();
        let epoch = store.try_begin_upload().unwrap();
        assert!(store.try_begin_upload().is_none());

        store.finish_upload(epoch);
        assert!(store.try_begin_upload().is_some());
    }

    #[test]
    fn test_complete_upload_keeps_late_events() {
        let (mut store, cache, _clock) = setup();
        store.record_action(EventKind::Click, "Louvre");
        let ticket = store.upload_ticket().unwrap();

        store.record_action(EventKind::Click, "Orsay");
        store.complete_upload(&ticket);

        let left = events(&store);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].place_name, "Orsay");
        assert!(cache.contains(&tracking_key("abc")));
    }

    #[test]
    fn test_complete_upload_clears_log_and_cache() {
        let (mut store, cache, _clock) = setup();
        store.record_action(EventKind::Click, "Louvre");
        let ticket = store.upload_ticket().unwrap();

        store.complete_upload(&ticket);
        assert!(store.current().is_none());
        assert!(!cache.contains(&tracking_key("abc")));
    }

    #[test]
    fn test_complete_upload_keeps_open_views_cached() {
        let (mut store, cache, _clock) = setup();
        store.record_action(EventKind::Click, "Louvre");
        store.start_viewing("Orsay");
        let ticket = store.upload_ticket().unwrap();

        store.complete_upload(&ticket);
        assert!(store.current().is_none());
        assert!(cache.contains(&tracking_key("abc")));

        let mut reloaded = BehaviorStore::new(cache, Arc::new(ManualClock::new()));
        reloaded.initialize("abc");
        assert!(reloaded.is_viewing("Orsay"));
        assert!(reloaded.current().is_none());
    }

    #[test]
    fn test_complete_upload_after_switch_settles_old_record() {
        let (mut store, cache, _clock) = setup();
        store.record_action(EventKind::Click, "Louvre");
        let ticket = store.upload_ticket().unwrap();

        store.initialize("xyz");
        store.complete_upload(&ticket);
        assert!(!cache.contains(&tracking_key("abc")));
        assert!(cache.contains(&tracking_key("xyz")));
        assert_eq!(store.session_id(), Some("xyz"));
    }

    #[test]
    fn test_complete_upload_after_switch_keeps_unsent_events() {
        let (mut store, cache, clock) = setup();
        store.record_action(EventKind::Click, "Louvre");
        let ticket = store.upload_ticket().unwrap();
        store.record_action(EventKind::Shortlist, "Orsay");

        store.initialize("xyz");
        store.complete_upload(&ticket);

        let mut back = BehaviorStore::new(cache, clock);
        back.initialize("abc");
        let left = events(&back);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].place_name, "Orsay");
    }

    #[test]
    fn test_teardown_invalidates_ticket() {
        let (mut store, _cache, _clock) = setup();
        let epoch = store.try_begin_upload().unwrap();
        store.clear_behavior();
        store.initialize("abc");
        assert!(store.start_tracking(Some("user-1"), Some("abc")));

        let claimed = store.try_begin_upload().unwrap();
        store.finish_upload(epoch);
        assert!(store.is_uploading());
        store.finish_upload(claimed);
        assert!(!store.is_uploading());
    }
}
