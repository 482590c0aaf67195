use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::server::errors::AppError;
use crate::sync::SyncContext;

/// Shared application state, wrapped in Arc for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub sync: SyncContext,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(sync: SyncContext) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                sync,
                started_at: Utc::now(),
            }),
        }
    }

    pub fn sync(&self) -> &SyncContext {
        &self.inner.sync
    }

    pub fn require_auth(&self) -> Result<(), AppError> {
        if self.sync().is_authenticated() {
            Ok(())
        } else {
            Err(AppError::Unauthorized("Not logged in".into()))
        }
    }

    /// Id of the active chat session, or a conflict when none is open.
    pub fn require_session(&self) -> Result<String, AppError> {
        self.sync()
            .read(|s| s.session.session_id().map(str::to_string))
            .ok_or_else(|| AppError::Conflict("No active session".into()))
    }
}
