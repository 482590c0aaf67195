//! The synchronization engine.
//!
//! Each store owns one slice of client state and is the only writer of its
//! cache keys. [`SyncContext`] holds all of them behind one lock and runs the
//! flows that span several stores: session entry, logout cascade, session
//! deletion and tracking upload. The lock is never held across an `.await`.

pub mod auth;
pub mod behavior;
pub mod errors;
pub mod session;
pub mod shortlist;
pub mod user_sessions;

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::cache::{Cache, CacheEvent};
use crate::clock::Clock;
use crate::model::{ChatTurn, DailyItinerary, EventKind, ShortTermProfile, ShortlistItem, TrackEvent};
use crate::remote::{Backend, ItineraryAction, ItineraryUpdate, RemoteError};

use auth::AuthStore;
use behavior::BehaviorStore;
use errors::SyncError;
use session::SessionStore;
use shortlist::ShortlistStore;
use user_sessions::UserSessionsStore;

pub struct Stores {
    pub auth: AuthStore,
    pub session: SessionStore,
    pub shortlist: ShortlistStore,
    pub behavior: BehaviorStore,
    pub user_sessions: UserSessionsStore,
}

/// How `initialize_session` satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLoad {
    AlreadyActive,
    Cache,
    Server,
    /// The user moved to another session while the fetch was in flight.
    Superseded,
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    Uploaded,
    Skipped,
}

#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    stores: Mutex<Stores>,
    backend: Arc<dyn Backend>,
    cache: Cache,
}

/// Releases the upload slot however `upload_and_restart` exits, including
/// when its future is dropped mid-request.
struct UploadSlot<'a> {
    ctx: &'a SyncContext,
    epoch: u64,
}

impl Drop for UploadSlot<'_> {
    fn drop(&mut self) {
        self.ctx.write(|s| s.behavior.finish_upload(self.epoch));
    }
}

impl SyncContext {
    pub fn new(cache: Cache, backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        let stores = Stores {
            auth: AuthStore::new(cache.clone(), clock.clone()),
            session: SessionStore::new(cache.clone(), clock.clone()),
            shortlist: ShortlistStore::new(cache.clone(), clock.clone()),
            behavior: BehaviorStore::new(cache.clone(), clock.clone()),
            user_sessions: UserSessionsStore::new(cache.clone(), clock),
        };
        Self {
            inner: Arc::new(SyncInner {
                stores: Mutex::new(stores),
                backend,
                cache,
            }),
        }
    }

    /// Mutation signal: one event per completed cache write or delete.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.cache.subscribe()
    }

    pub fn read<R>(&self, f: impl FnOnce(&Stores) -> R) -> R {
        f(&self.inner.stores.lock())
    }

    fn write<R>(&self, f: impl FnOnce(&mut Stores) -> R) -> R {
        f(&mut self.inner.stores.lock())
    }

    /// Restore auth and the session list from cache, falling back to the
    /// server for the list. A persisted token found expired or unreadable
    /// tears down every session the list still names.
    pub async fn initialize(&self) {
        let needs_fetch = self.write(|s| {
            let dropped = s.auth.initialize();
            let loaded = s.user_sessions.initialize();
            if dropped {
                info!("Previous login is no longer valid");
                teardown(s);
                return false;
            }
            !loaded
        });
        if needs_fetch {
            self.get_sessions().await;
        }
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    pub fn login(&self, token: &str) {
        self.write(|s| s.auth.set_token(token));
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(|s| s.auth.is_authenticated())
    }

    /// Tear down every known session's caches, then drop the token.
    pub fn logout(&self) {
        self.write(teardown);
    }

    /// User id for a network call. A token found expired here triggers the
    /// full logout cascade.
    fn authenticated_user(&self) -> Option<String> {
        self.write(|s| {
            if let Some(user_id) = s.auth.user_id() {
                return Some(user_id.to_string());
            }
            if s.auth.has_token() {
                info!("Auth token expired; logging out");
                teardown(s);
            }
            None
        })
    }

    // -----------------------------------------------------------------------
    // Session entry
    // -----------------------------------------------------------------------

    /// Make `id` the active session, from a fresh cache record when there is
    /// one and from the server otherwise.
    pub async fn initialize_session(&self, id: &str) -> Result<SessionLoad, SyncError> {
        let cached = self.write(|s| {
            if s.session.is_ready(id) {
                return Some(SessionLoad::AlreadyActive);
            }
            if !s.session.load_from_cache(id) {
                return None;
            }
            s.shortlist.initialize(id);
            s.behavior.initialize(id);
            s.user_sessions.set_current_session(Some(id));
            Some(SessionLoad::Cache)
        });

        match cached {
            Some(load) => {
                debug!("Session {}: {:?}", id, load);
                Ok(load)
            }
            None => self.fetch_from_server(id).await,
        }
    }

    pub async fn fetch_from_server(&self, id: &str) -> Result<SessionLoad, SyncError> {
        let Some(user_id) = self.authenticated_user() else {
            debug!("Not fetching session {}: unauthenticated", id);
            return Ok(SessionLoad::Unauthenticated);
        };

        self.write(|s| {
            s.session.begin_hydrating(id);
            s.user_sessions.set_current_session(Some(id));
        });

        let snapshot = self.inner.backend.fetch_session(id, &user_id).await?;

        let applied = self.write(|s| {
            if !s.session.is_hydrating(id) {
                return false;
            }
            s.session.apply_snapshot(&snapshot);
            s.shortlist.initialize(id);
            s.shortlist.merge(&snapshot.shortlist);
            s.behavior.initialize(id);
            s.behavior.persist();
            if !s.user_sessions.contains(id) {
                let title = s.session.title().to_string();
                s.user_sessions.update_session(id, &title);
            }
            true
        });

        if !applied {
            debug!("Discarding late snapshot for session {}", id);
            return Ok(SessionLoad::Superseded);
        }

        info!(
            "Fetched session {}: {} turns, {} shortlisted",
            id,
            snapshot.messages.len(),
            snapshot.shortlist.len()
        );
        Ok(SessionLoad::Server)
    }

    // -----------------------------------------------------------------------
    // Session mutations
    // -----------------------------------------------------------------------

    pub fn send_message(&self, text: &str) -> bool {
        self.write(|s| match s.session.send_message(text) {
            Some(id) => {
                bump(s, &id);
                true
            }
            None => false,
        })
    }

    pub fn append_history(&self, turn: ChatTurn) -> bool {
        self.write(|s| match s.session.append_history(turn) {
            Some(id) => {
                bump(s, &id);
                true
            }
            None => false,
        })
    }

    pub fn set_short_term_profile(&self, profile: Option<ShortTermProfile>) -> bool {
        self.write(|s| match s.session.set_short_term_profile(profile) {
            Some(id) => {
                bump(s, &id);
                true
            }
            None => false,
        })
    }

    /// Rename locally, then tell the server. A server failure is returned but
    /// the local title stays.
    pub async fn set_title(&self, title: &str) -> Result<bool, SyncError> {
        let Some(user_id) = self.authenticated_user() else {
            return Ok(false);
        };
        let renamed = self.write(|s| {
            let id = s.session.set_title(title)?;
            s.user_sessions.update_session(&id, title);
            Some(id)
        });
        let Some(id) = renamed else {
            return Ok(false);
        };

        if let Err(e) = self.inner.backend.rename_session(&id, &user_id, title).await {
            warn!("Server rename of {} failed; keeping local title: {}", id, e);
            return Err(e.into());
        }
        Ok(true)
    }

    pub fn update_recommendation(&self, place_name: &str, patch: &Map<String, Value>) -> bool {
        self.write(|s| {
            if !s.session.update_recommendation(place_name, patch) {
                return false;
            }
            if let Some(id) = s.session.session_id().map(str::to_string) {
                bump(s, &id);
            }
            true
        })
    }

    /// Replace an assistant turn's itinerary and push it to the server.
    pub async fn save_itinerary(
        &self,
        chat_idx: usize,
        itinerary: Vec<DailyItinerary>,
        action: ItineraryAction,
    ) -> Result<bool, SyncError> {
        let Some(user_id) = self.authenticated_user() else {
            return Ok(false);
        };
        let edited = self.write(|s| {
            let id = s.session.set_itinerary(chat_idx, itinerary.clone())?;
            bump(s, &id);
            Some(id)
        });
        let Some(id) = edited else {
            return Ok(false);
        };

        let update = ItineraryUpdate {
            user_id,
            itinerary,
            chat_idx,
        };
        self.inner.backend.post_itinerary(&id, action, &update).await?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Shortlist
    // -----------------------------------------------------------------------

    pub fn add_to_shortlist(&self, item: ShortlistItem) -> Result<(), SyncError> {
        self.write(|s| {
            let id = s.shortlist.add(item)?;
            bump(s, &id);
            Ok(())
        })
    }

    pub fn remove_from_shortlist(&self, name: &str) -> Result<(), SyncError> {
        self.write(|s| {
            let id = s.shortlist.remove(name)?;
            bump(s, &id);
            Ok(())
        })
    }

    /// Fetch the rich payload for a shortlisted place that has none yet.
    pub async fn enrich_shortlist_item(&self, name: &str) -> bool {
        let target = self.read(|s| {
            let item = s.shortlist.get(name)?;
            if item.info.is_some() {
                return None;
            }
            s.shortlist.session_id().map(str::to_string)
        });
        let Some(session_id) = target else {
            return false;
        };

        match self.inner.backend.enrich_place(name).await {
            Ok(enriched) => self.write(|s| s.shortlist.apply_enrichment(&session_id, enriched)),
            Err(e) => {
                warn!("Enrichment of '{}' failed (not retried): {}", name, e);
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Behavior tracking
    // -----------------------------------------------------------------------

    pub fn start_tracking(&self) -> bool {
        self.write(|s| {
            s.behavior
                .start_tracking(s.auth.user_id(), s.session.session_id())
        })
    }

    pub fn record_action(&self, kind: EventKind, place_name: &str) -> bool {
        self.write(|s| {
            let recorded = s.behavior.record_action(kind, place_name);
            if recorded {
                bump_tracked(s);
            }
            recorded
        })
    }

    pub fn start_viewing(&self, place_name: &str) {
        self.write(|s| {
            s.behavior.start_viewing(place_name);
            if s.behavior.is_viewing(place_name) {
                bump_tracked(s);
            }
        });
    }

    pub fn end_viewing(&self, place_name: &str) -> Option<TrackEvent> {
        self.write(|s| {
            let open = s.behavior.is_viewing(place_name);
            let event = s.behavior.end_viewing(place_name);
            if open {
                bump_tracked(s);
            }
            event
        })
    }

    /// Upload the current batch; on success start a fresh log. Overlapping
    /// calls collapse into the one already in flight. On failure the batch
    /// stays in memory and in cache for the next attempt.
    pub async fn upload_and_restart(&self) -> Result<UploadOutcome, SyncError> {
        let Some(epoch) = self.write(|s| s.behavior.try_begin_upload()) else {
            return Ok(UploadOutcome::Skipped);
        };
        let _slot = UploadSlot { ctx: self, epoch };

        if !self.upload_data().await? {
            return Ok(UploadOutcome::Skipped);
        }
        self.start_tracking();
        Ok(UploadOutcome::Uploaded)
    }

    /// Post the whole tracking session. Success clears the uploaded events and
    /// the cache entry; failure changes nothing.
    pub async fn upload_data(&self) -> Result<bool, SyncError> {
        let Some(ticket) = self.read(|s| s.behavior.upload_ticket()) else {
            return Ok(false);
        };

        if let Err(e) = self.inner.backend.upload_tracking(&ticket.batch).await {
            error!("Failed to upload tracking data: {}", e);
            return Err(e.into());
        }

        debug!("Uploaded {} tracking events", ticket.batch.events.len());
        self.write(|s| s.behavior.complete_upload(&ticket));
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // User sessions
    // -----------------------------------------------------------------------

    /// Fetch the list from the server unless one is already loaded.
    pub async fn get_sessions(&self) -> bool {
        if !self.read(|s| s.user_sessions.is_empty()) {
            return false;
        }
        let Some(user_id) = self.authenticated_user() else {
            return false;
        };

        match self.inner.backend.list_sessions(&user_id).await {
            Ok(fetched) => {
                info!("Fetched {} sessions", fetched.len());
                self.write(|s| s.user_sessions.merge_fetched(fetched));
                true
            }
            Err(e) => {
                error!("Failed to fetch sessions: {}", e);
                false
            }
        }
    }

    /// Remove a session everywhere locally, then tell the server.
    pub async fn delete_session(&self, id: &str) -> bool {
        let Some(user_id) = self.authenticated_user() else {
            return false;
        };

        self.write(|s| {
            s.user_sessions.remove(id);
            discard_session(s, id);
        });
        info!("Deleted session {} locally", id);

        fire_and_log(
            "Server-side session delete",
            self.inner.backend.delete_session(id, &user_id),
        )
        .await;
        true
    }

    // -----------------------------------------------------------------------
    // Survey
    // -----------------------------------------------------------------------

    pub async fn save_consent(&self, consent_hash: &str) -> bool {
        let Some(user_id) = self.authenticated_user() else {
            return false;
        };
        fire_and_log(
            "Consent save",
            self.inner.backend.save_consent(&user_id, consent_hash),
        )
        .await;
        true
    }
}

/// Bump the summary for `id`, creating it from the session title if needed.
fn bump(s: &mut Stores, id: &str) {
    let title = s.session.title().to_string();
    s.user_sessions.touch_or_insert(id, &title);
}

fn bump_tracked(s: &mut Stores) {
    if let Some(id) = s.behavior.session_id().map(str::to_string) {
        bump(s, &id);
    }
}

/// Delete every cache record of `id` and detach any store bound to it.
fn discard_session(s: &mut Stores, id: &str) {
    s.shortlist.clear_local_storage(id);
    s.behavior.clear_storage(id);
    s.session.clear_local_storage(id);

    if s.session.session_id() == Some(id) {
        s.session.clear_session();
    }
    if s.shortlist.session_id() == Some(id) {
        s.shortlist.clear_shortlist();
    }
    if s.behavior.session_id() == Some(id) {
        s.behavior.clear_behavior();
    }
}

/// Logout cascade. Runs under one lock, so it is never observed half done.
fn teardown(s: &mut Stores) {
    let mut ids = s.user_sessions.session_ids();
    for bound in [
        s.session.session_id(),
        s.shortlist.session_id(),
        s.behavior.session_id(),
    ]
    .into_iter()
    .flatten()
    {
        if !ids.iter().any(|id| id == bound) {
            ids.push(bound.to_string());
        }
    }

    for id in &ids {
        discard_session(s, id);
    }
    s.session.clear_session();
    s.shortlist.clear_shortlist();
    s.behavior.clear_behavior();
    s.user_sessions.clear();
    s.auth.clear();

    info!("Logged out; cleared caches for {} sessions", ids.len());
}

/// Await a best-effort request and log its failure. No retry.
async fn fire_and_log<F>(label: &str, request: F)
where
    F: Future<Output = Result<(), RemoteError>>,
{
    if let Err(e) = request.await {
        warn!("{} failed (not retried): {}", label, e);
    }
}
