use chrono::Duration;

/// How long a bearer token stays valid after `set_token`.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Persisted session records older than this are refetched from the server.
pub const FRESHNESS_WINDOW_HOURS: i64 = 24;

/// A viewing interval shorter than this is noise and never becomes an event.
pub const MIN_VIEW_SECONDS: f64 = 10.0;

/// Title given to a session before the server or the user names it.
pub const DEFAULT_TITLE: &str = "New Chat";

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// Cache directory relative to the home directory.
pub const DEFAULT_CACHE_DIR: &str = ".tripsync/cache";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub fn token_ttl() -> Duration {
    Duration::hours(TOKEN_TTL_HOURS)
}

pub fn freshness_window() -> Duration {
    Duration::hours(FRESHNESS_WINDOW_HOURS)
}

// ---------------------------------------------------------------------------
// Cache key layout
// ---------------------------------------------------------------------------

pub const AUTH_KEY: &str = "auth";
pub const USER_SESSIONS_KEY: &str = "user_sessions_data";

pub fn session_key(session_id: &str) -> String {
    format!("session_{}", session_id)
}

pub fn shortlist_key(session_id: &str) -> String {
    format!("shortlist_items:{}", session_id)
}

pub fn tracking_key(session_id: &str) -> String {
    format!("tracking_data:{}", session_id)
}
