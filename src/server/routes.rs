use axum::extract::{Path, State};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::model::{ChatTurn, DailyItinerary, EventKind, ShortTermProfile, ShortlistItem};
use crate::remote::ItineraryAction;
use crate::server::errors::AppError;
use crate::server::state::AppState;
use crate::sync::SessionLoad;

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

pub fn build_routes(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/api/v1/health", get(health))
        // Auth
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/auth/status", get(auth_status))
        // Session list
        .route("/api/v1/sessions", get(list_sessions).post(create_session))
        .route("/api/v1/sessions/{id}", delete(delete_session))
        .route("/api/v1/sessions/{id}/open", post(open_session))
        // Active session
        .route("/api/v1/session", get(get_session))
        .route("/api/v1/session/messages", post(send_message))
        .route("/api/v1/session/history", post(append_history))
        .route("/api/v1/session/profile", put(set_profile))
        .route("/api/v1/session/title", put(set_title))
        .route(
            "/api/v1/session/recommendations/{name}",
            patch(update_recommendation),
        )
        .route("/api/v1/session/itinerary", post(save_itinerary))
        // Shortlist
        .route("/api/v1/shortlist", get(list_shortlist).post(add_to_shortlist))
        .route("/api/v1/shortlist/{name}", delete(remove_from_shortlist))
        // Tracking
        .route("/api/v1/tracking", get(tracking_status))
        .route("/api/v1/tracking/start", post(start_tracking))
        .route("/api/v1/tracking/actions", post(record_action))
        .route("/api/v1/tracking/views/{name}/start", post(start_viewing))
        .route("/api/v1/tracking/views/{name}/end", post(end_viewing))
        .route("/api/v1/tracking/upload", post(upload_tracking))
        // Survey
        .route("/api/v1/consent", post(save_consent))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<Value> {
    let (active_session, session_count) = state.sync().read(|s| {
        (
            s.session.session_id().map(str::to_string),
            s.user_sessions.sessions().len(),
        )
    });

    Json(json!({
        "status": "ok",
        "authenticated": state.sync().is_authenticated(),
        "active_session": active_session,
        "sessions": session_count,
        "started_at": state.inner.started_at.to_rfc3339(),
    }))
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LoginRequest {
    token: String,
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, AppError> {
    if body.token.is_empty() {
        return Err(AppError::BadRequest("Token must not be empty".into()));
    }
    state.sync().login(&body.token);
    // first login on this device has no cached list yet
    let fetched = state.sync().get_sessions().await;
    Ok(Json(json!({ "authenticated": true, "sessions_fetched": fetched })))
}

async fn logout(State(state): State<AppState>) -> Json<Value> {
    state.sync().logout();
    Json(json!({ "authenticated": false }))
}

async fn auth_status(State(state): State<AppState>) -> Json<Value> {
    let expires_at = state.sync().read(|s| s.auth.expires_at());
    Json(json!({
        "authenticated": state.sync().is_authenticated(),
        "expires_at": expires_at.map(|t| t.to_rfc3339()),
    }))
}

// ---------------------------------------------------------------------------
// Session list
// ---------------------------------------------------------------------------

async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.require_auth()?;
    state.sync().get_sessions().await;

    let (sessions, current) = state.sync().read(|s| {
        (
            s.user_sessions.sessions().to_vec(),
            s.user_sessions.current_session_id().map(str::to_string),
        )
    });
    Ok(Json(json!({
        "sessions": sessions,
        "count": sessions.len(),
        "current_session_id": current,
    })))
}

async fn create_session(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.require_auth()?;
    let id = uuid::Uuid::new_v4().to_string();
    let load = state.sync().initialize_session(&id).await?;
    session_opened(&id, load)
}

#[derive(Deserialize)]
struct SessionPath {
    id: String,
}

async fn open_session(
    State(state): State<AppState>,
    Path(params): Path<SessionPath>,
) -> Result<Json<Value>, AppError> {
    let load = state.sync().initialize_session(&params.id).await?;
    session_opened(&params.id, load)
}

fn session_opened(id: &str, load: SessionLoad) -> Result<Json<Value>, AppError> {
    if load == SessionLoad::Unauthenticated {
        return Err(AppError::Unauthorized("Not logged in".into()));
    }
    debug!("Opened session {} ({:?})", id, load);
    Ok(Json(json!({ "session_id": id, "source": load })))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(params): Path<SessionPath>,
) -> Result<Json<Value>, AppError> {
    if !state.sync().delete_session(&params.id).await {
        return Err(AppError::Unauthorized("Not logged in".into()));
    }
    Ok(Json(json!({ "deleted": true })))
}

// ---------------------------------------------------------------------------
// Active session
// ---------------------------------------------------------------------------

async fn get_session(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let view = state
        .sync()
        .read(|s| serde_json::to_value(s.session.view()))
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(view))
}

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<Value>, AppError> {
    if !state.sync().send_message(&body.text) {
        return Err(AppError::Conflict("No active session".into()));
    }
    Ok(Json(json!({ "ok": true })))
}

async fn append_history(
    State(state): State<AppState>,
    Json(turn): Json<ChatTurn>,
) -> Result<Json<Value>, AppError> {
    if !state.sync().append_history(turn) {
        return Err(AppError::Conflict("No active session".into()));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct ProfileRequest {
    short_term_profile: Option<ShortTermProfile>,
}

async fn set_profile(
    State(state): State<AppState>,
    Json(body): Json<ProfileRequest>,
) -> Result<Json<Value>, AppError> {
    if !state.sync().set_short_term_profile(body.short_term_profile) {
        return Err(AppError::Conflict("No active session".into()));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct TitleRequest {
    title: String,
}

async fn set_title(
    State(state): State<AppState>,
    Json(body): Json<TitleRequest>,
) -> Result<Json<Value>, AppError> {
    state.require_auth()?;
    state.require_session()?;
    state.sync().set_title(&body.title).await?;
    Ok(Json(json!({ "ok": true, "title": body.title })))
}

#[derive(Deserialize)]
struct PlacePath {
    name: String,
}

async fn update_recommendation(
    State(state): State<AppState>,
    Path(params): Path<PlacePath>,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<Value>, AppError> {
    if !state.sync().update_recommendation(&params.name, &patch) {
        return Err(AppError::NotFound(format!(
            "No assistant turn recommends '{}'",
            params.name
        )));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct ItineraryRequest {
    chat_idx: usize,
    itinerary: Vec<DailyItinerary>,
    #[serde(default)]
    action: Option<String>,
}

async fn save_itinerary(
    State(state): State<AppState>,
    Json(body): Json<ItineraryRequest>,
) -> Result<Json<Value>, AppError> {
    let action = match body.action.as_deref() {
        None => ItineraryAction::Save,
        Some(s) => s
            .parse::<ItineraryAction>()
            .map_err(|e| AppError::BadRequest(format!("{}. Use save or update", e)))?,
    };
    state.require_auth()?;
    state.require_session()?;

    let saved = state
        .sync()
        .save_itinerary(body.chat_idx, body.itinerary, action)
        .await?;
    if !saved {
        return Err(AppError::BadRequest(format!(
            "Turn {} is not an assistant reply",
            body.chat_idx
        )));
    }
    Ok(Json(json!({ "ok": true, "endpoint": action.endpoint() })))
}

// ---------------------------------------------------------------------------
// Shortlist
// ---------------------------------------------------------------------------

async fn list_shortlist(State(state): State<AppState>) -> Json<Value> {
    let (session_id, items) = state.sync().read(|s| {
        (
            s.shortlist.session_id().map(str::to_string),
            s.shortlist.item_list(),
        )
    });
    Json(json!({ "session_id": session_id, "items": items, "count": items.len() }))
}

async fn add_to_shortlist(
    State(state): State<AppState>,
    Json(item): Json<ShortlistItem>,
) -> Result<Json<Value>, AppError> {
    if item.name.is_empty() {
        return Err(AppError::BadRequest("Place name must not be empty".into()));
    }
    let name = item.name.clone();
    state.sync().add_to_shortlist(item)?;

    // Details arrive in the background; the add itself never waits on them.
    let sync = state.sync().clone();
    let place = name.clone();
    tokio::spawn(async move {
        sync.enrich_shortlist_item(&place).await;
    });

    Ok(Json(json!({ "ok": true, "name": name })))
}

async fn remove_from_shortlist(
    State(state): State<AppState>,
    Path(params): Path<PlacePath>,
) -> Result<Json<Value>, AppError> {
    state.sync().remove_from_shortlist(&params.name)?;
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

async fn tracking_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.sync().read(|s| {
        json!({
            "session_id": s.behavior.session_id(),
            "tracking": s.behavior.current().is_some(),
            "events": s.behavior.current().map_or(0, |c| c.events.len()),
            "uploading": s.behavior.is_uploading(),
        })
    });
    Json(status)
}

async fn start_tracking(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.require_auth()?;
    if !state.sync().start_tracking() {
        return Err(AppError::Conflict("No active session to track".into()));
    }
    Ok(Json(json!({ "tracking": true })))
}

#[derive(Deserialize)]
struct ActionRequest {
    event_type: String,
    place_name: String,
}

async fn record_action(
    State(state): State<AppState>,
    Json(body): Json<ActionRequest>,
) -> Result<Json<Value>, AppError> {
    let kind = body
        .event_type
        .parse::<EventKind>()
        .map_err(|e| AppError::BadRequest(format!("{}. Valid: click, view, shortlist", e)))?;
    if !state.sync().record_action(kind, &body.place_name) {
        return Err(AppError::Conflict("Tracking has not been started".into()));
    }
    Ok(Json(json!({ "ok": true })))
}

async fn start_viewing(
    State(state): State<AppState>,
    Path(params): Path<PlacePath>,
) -> Json<Value> {
    state.sync().start_viewing(&params.name);
    Json(json!({ "ok": true }))
}

async fn end_viewing(
    State(state): State<AppState>,
    Path(params): Path<PlacePath>,
) -> Json<Value> {
    let event = state.sync().end_viewing(&params.name);
    Json(json!({ "recorded": event.is_some(), "event": event }))
}

async fn upload_tracking(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let outcome = state.sync().upload_and_restart().await?;
    Ok(Json(json!({ "outcome": outcome })))
}

// ---------------------------------------------------------------------------
// Survey
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ConsentRequest {
    consent_hash: String,
}

async fn save_consent(
    State(state): State<AppState>,
    Json(body): Json<ConsentRequest>,
) -> Result<Json<Value>, AppError> {
    if !state.sync().save_consent(&body.consent_hash).await {
        return Err(AppError::Unauthorized("Not logged in".into()));
    }
    Ok(Json(json!({ "ok": true })))
}
