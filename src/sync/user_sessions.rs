use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::Cache;
use crate::clock::Clock;
use crate::config::USER_SESSIONS_KEY;
use crate::model::SessionSummary;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSessionsRecord {
    sessions: Vec<SessionSummary>,
    #[serde(default)]
    current_session_id: Option<String>,
    timestamp: DateTime<Utc>,
}

/// The user's session list, newest first, one entry per session id.
pub struct UserSessionsStore {
    cache: Cache,
    clock: Arc<dyn Clock>,
    sessions: Vec<SessionSummary>,
    current_session_id: Option<String>,
}

impl UserSessionsStore {
    pub fn new(cache: Cache, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock,
            sessions: Vec::new(),
            current_session_id: None,
        }
    }

    /// Hydrate from cache. Returns false when there was nothing usable, in
    /// which case the caller should fetch from the server.
    pub fn initialize(&mut self) -> bool {
        let Some(record) = self.cache.load::<UserSessionsRecord>(USER_SESSIONS_KEY) else {
            return false;
        };
        self.sessions = record.sessions;
        self.current_session_id = record.current_session_id;
        self.dedup_and_sort();
        debug!("Hydrated {} session summaries", self.sessions.len());
        true
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.session_id.clone()).collect()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.iter().any(|s| s.session_id == session_id)
    }

    /// Union a server listing into the local one. Local entries win.
    pub fn merge_fetched(&mut self, fetched: Vec<SessionSummary>) {
        for summary in fetched {
            if !self.contains(&summary.session_id) {
                self.sessions.push(summary);
            }
        }
        self.dedup_and_sort();
        self.save();
    }

    /// Upsert by id. An update re-sorts the list; an insert goes to the front.
    pub fn update_session(&mut self, session_id: &str, title: &str) {
        let now = self.clock.now();
        match self.sessions.iter_mut().find(|s| s.session_id == session_id) {
            Some(summary) => {
                summary.title = title.to_string();
                summary.update_time = now;
                sort_desc(&mut self.sessions);
            }
            None => self.sessions.insert(
                0,
                SessionSummary {
                    session_id: session_id.to_string(),
                    title: title.to_string(),
                    update_time: now,
                },
            ),
        }
        self.save();
    }

    /// Touch `session_id` and splice it to the front. The rest of the list is
    /// already sorted and untouched, so no full sort is needed.
    pub fn update_session_time(&mut self, session_id: &str) -> bool {
        let Some(index) = self.sessions.iter().position(|s| s.session_id == session_id) else {
            return false;
        };
        let mut summary = self.sessions.remove(index);
        summary.update_time = self.clock.now();
        self.sessions.insert(0, summary);
        self.save();
        true
    }

    /// Bump recency, creating the summary on first sight.
    pub fn touch_or_insert(&mut self, session_id: &str, title: &str) {
        if !self.update_session_time(session_id) {
            self.update_session(session_id, title);
        }
    }

    pub fn remove(&mut self, session_id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.session_id != session_id);
        if self.current_session_id.as_deref() == Some(session_id) {
            self.current_session_id = None;
        }
        let removed = self.sessions.len() != before;
        self.save();
        removed
    }

    pub fn set_current_session(&mut self, session_id: Option<&str>) {
        self.current_session_id = session_id.map(str::to_string);
        self.save();
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.current_session_id = None;
        self.cache.remove(USER_SESSIONS_KEY);
    }

    fn dedup_and_sort(&mut self) {
        sort_desc(&mut self.sessions);
        let mut seen = std::collections::HashSet::new();
        self.sessions.retain(|s| seen.insert(s.session_id.clone()));
    }

    fn save(&self) {
        let record = UserSessionsRecord {
            sessions: self.sessions.clone(),
            current_session_id: self.current_session_id.clone(),
            timestamp: self.clock.now(),
        };
        self.cache.save(USER_SESSIONS_KEY, &record);
    }
}

fn sort_desc(sessions: &mut [SessionSummary]) {
    sessions.sort_by(|a, b| b.update_time.cmp(&a.update_time));
}
