//! HTTP + WebSocket control surface.
//!
//! REST endpoints for accounts, recipients, the activity log and the
//! scheduler, plus `/ws/events` streaming live warm-up events.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::activity::ActivityLogger;
use crate::error::DatabaseError;
use crate::events::{EventHub, EventKind, EventSink, WsMessage};
use crate::model::{Account, AccountStatus, ActivityRecord, DailyTotals, Recipient, WorkingHours};
use crate::ramp::{self, MAX_STAGE};
use crate::scheduler::{CycleScheduler, RESET_JOB, REPLY_JOB, SchedulerState, WARMUP_JOB};
use crate::store::{AccountStore, ActivityLog, RecipientPool};

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<dyn AccountStore>,
    pub recipients: Arc<dyn RecipientPool>,
    pub log: Arc<dyn ActivityLog>,
    pub activity: ActivityLogger,
    pub events: EventSink,
    pub hub: Arc<EventHub>,
    pub scheduler: Arc<CycleScheduler>,
    /// Window given to accounts created without one.
    pub default_hours: WorkingHours,
}

/// Build the Axum router with control REST and event WebSocket routes.
pub fn control_routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ws/events", get(ws_handler))
        .route("/api/status", get(status))
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route("/api/accounts/{id}", axum::routing::delete(delete_account))
        .route("/api/accounts/{id}/pause", post(pause_account))
        .route("/api/accounts/{id}/resume", post(resume_account))
        .route("/api/accounts/{id}/stage", post(set_stage))
        .route("/api/recipients", get(list_recipients).post(add_recipients))
        .route("/api/recipients/{id}", axum::routing::delete(delete_recipient))
        .route("/api/logs", get(recent_logs))
        .route("/api/scheduler/start", post(start_scheduler))
        .route("/api/scheduler/stop", post(stop_scheduler))
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn db_error(e: DatabaseError) -> Response {
    match e {
        DatabaseError::NotFound { .. } => error_response(StatusCode::NOT_FOUND, e.to_string()),
        DatabaseError::Duplicate { .. } => error_response(StatusCode::CONFLICT, e.to_string()),
        other => {
            error!(error = %other, "Store error in control API");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ── Health / status ─────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "warmup-engine"
    }))
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AccountCounts {
    pub total: usize,
    pub active: usize,
    pub paused: usize,
    pub error: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusView {
    pub scheduler: SchedulerState,
    pub next_warmup: Option<DateTime<Local>>,
    pub next_reply: Option<DateTime<Local>>,
    pub next_reset: Option<DateTime<Local>>,
    pub today: DailyTotals,
    pub accounts: AccountCounts,
}

async fn status(State(state): State<AppState>) -> Response {
    let accounts = match state.accounts.all().await {
        Ok(a) => a,
        Err(e) => return db_error(e),
    };
    let today = match state.log.daily_totals().await {
        Ok(t) => t,
        Err(e) => return db_error(e),
    };

    let mut counts = AccountCounts {
        total: accounts.len(),
        ..AccountCounts::default()
    };
    for account in &accounts {
        match account.status {
            AccountStatus::Active => counts.active += 1,
            AccountStatus::Paused => counts.paused += 1,
            AccountStatus::Error => counts.error += 1,
        }
    }

    let scheduler = &state.scheduler;
    Json(StatusView {
        scheduler: scheduler.state(),
        next_warmup: scheduler.next_fire(WARMUP_JOB),
        next_reply: scheduler.next_fire(REPLY_JOB),
        next_reset: scheduler.next_fire(RESET_JOB),
        today,
        accounts: counts,
    })
    .into_response()
}

// ── Accounts ────────────────────────────────────────────────────────────

/// Account as returned by the API. Never carries the password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub email: String,
    pub display_name: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub imap_host: String,
    pub imap_port: u16,
    pub stage: u8,
    pub daily_limit: u32,
    pub sent_today: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub pause_reason: String,
    pub work_start: String,
    pub work_end: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        Self {
            email: a.email.clone(),
            display_name: a.display_name.clone(),
            smtp_host: a.smtp_host.clone(),
            smtp_port: a.smtp_port,
            imap_host: a.imap_host.clone(),
            imap_port: a.imap_port,
            stage: a.stage,
            daily_limit: a.daily_limit,
            sent_today: a.sent_today,
            last_sent_at: a.last_sent_at,
            status: a.status,
            pause_reason: a.pause_reason.clone(),
            work_start: a.working_hours.start_str(),
            work_end: a.working_hours.end_str(),
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub imap_host: Option<String>,
    #[serde(default)]
    pub imap_port: Option<u16>,
    #[serde(default)]
    pub work_start: Option<String>,
    #[serde(default)]
    pub work_end: Option<String>,
    #[serde(default)]
    pub stage: Option<u8>,
}

impl NewAccount {
    fn into_account(self, default_hours: WorkingHours) -> Result<Account, String> {
        let email = self.email.trim().to_string();
        if !email.contains('@') {
            return Err(format!("invalid email address: {email}"));
        }
        if self.password.is_empty() {
            return Err("password is required".to_string());
        }

        let hours = if self.work_start.is_none() && self.work_end.is_none() {
            default_hours
        } else {
            let start = self.work_start.unwrap_or_else(|| default_hours.start_str());
            let end = self.work_end.unwrap_or_else(|| default_hours.end_str());
            WorkingHours::parse(&start, &end)?
        };

        let mut account = Account::new(email, self.password).with_working_hours(hours);
        if let Some(name) = self.display_name {
            account = account.with_display_name(name);
        }
        if let Some(host) = self.smtp_host {
            let port = self.smtp_port.unwrap_or(account.smtp_port);
            account = account.with_smtp(host, port);
        } else if let Some(port) = self.smtp_port {
            account.smtp_port = port;
        }
        if let Some(host) = self.imap_host {
            let port = self.imap_port.unwrap_or(account.imap_port);
            account = account.with_imap(host, port);
        } else if let Some(port) = self.imap_port {
            account.imap_port = port;
        }
        if let Some(stage) = self.stage {
            if !(1..=MAX_STAGE).contains(&stage) {
                return Err(format!("stage must be between 1 and {MAX_STAGE}"));
            }
            account.stage = stage;
            account.daily_limit = ramp::daily_limit(stage);
        }
        Ok(account)
    }
}

async fn list_accounts(State(state): State<AppState>) -> Response {
    match state.accounts.all().await {
        Ok(accounts) => {
            Json(accounts.iter().map(AccountView::from).collect::<Vec<_>>()).into_response()
        }
        Err(e) => db_error(e),
    }
}

async fn create_account(State(state): State<AppState>, Json(body): Json<NewAccount>) -> Response {
    let account = match body.into_account(state.default_hours) {
        Ok(a) => a,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };
    let view = AccountView::from(&account);
    match state.accounts.add(account).await {
        Ok(()) => {
            info!(account = %view.email, "Account added via API");
            state
                .activity
                .info(&view.email, &format!("Account added at stage {}", view.stage))
                .await;
            (StatusCode::CREATED, Json(view)).into_response()
        }
        Err(e) => db_error(e),
    }
}

async fn delete_account(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.accounts.delete(&id).await {
        Ok(true) => {
            info!(account = %id, "Account deleted via API");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Account {id} not found")),
        Err(e) => db_error(e),
    }
}

const MANUAL_PAUSE: &str = "Manually paused";

async fn pause_account(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.accounts.pause(&id, MANUAL_PAUSE).await {
        Ok(account) => {
            info!(account = %id, "Account paused via API");
            state.activity.pause(&id, MANUAL_PAUSE).await;
            state.events.emit(EventKind::Pause, id.as_str(), MANUAL_PAUSE);
            Json(AccountView::from(&account)).into_response()
        }
        Err(e) => db_error(e),
    }
}

async fn resume_account(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.accounts.resume(&id).await {
        Ok(account) => {
            info!(account = %id, "Account resumed via API");
            state.activity.resume(&id).await;
            state.events.emit(EventKind::Resume, id.as_str(), "Manually resumed");
            Json(AccountView::from(&account)).into_response()
        }
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StageChange {
    pub stage: u8,
}

async fn set_stage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StageChange>,
) -> Response {
    if !(1..=MAX_STAGE).contains(&body.stage) {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("stage must be between 1 and {MAX_STAGE}"),
        );
    }
    let before = match state.accounts.find(&id).await {
        Ok(Some(a)) => a.stage,
        Ok(None) => return db_error(DatabaseError::not_found("account", &id)),
        Err(e) => return db_error(e),
    };
    match state.accounts.update_stage(&id, body.stage).await {
        Ok(account) => {
            info!(account = %id, from = before, to = body.stage, "Stage set via API");
            if before != body.stage {
                state.activity.stage_advance(&id, before, body.stage).await;
            }
            Json(AccountView::from(&account)).into_response()
        }
        Err(e) => db_error(e),
    }
}

// ── Recipients ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NewRecipient {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct NewRecipients {
    pub recipients: Vec<NewRecipient>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddedRecipients {
    pub added: usize,
    pub skipped: Vec<String>,
}

async fn list_recipients(State(state): State<AppState>) -> Response {
    match state.recipients.all().await {
        Ok(recipients) => Json(recipients).into_response(),
        Err(e) => db_error(e),
    }
}

/// Bulk add. Existing or malformed addresses are reported back as skipped.
async fn add_recipients(
    State(state): State<AppState>,
    Json(body): Json<NewRecipients>,
) -> Response {
    let mut added = 0;
    let mut skipped = Vec::new();
    for entry in body.recipients {
        let email = entry.email.trim().to_string();
        if !email.contains('@') {
            skipped.push(email);
            continue;
        }
        let recipient = Recipient::new(email.clone()).with_name(entry.name.trim());
        match state.recipients.add(recipient).await {
            Ok(true) => added += 1,
            Ok(false) => skipped.push(email),
            Err(e) => return db_error(e),
        }
    }
    info!(added, skipped = skipped.len(), "Recipients added via API");
    Json(AddedRecipients { added, skipped }).into_response()
}

async fn delete_recipient(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.recipients.delete(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Recipient {id} not found")),
        Err(e) => db_error(e),
    }
}

// ── Activity log ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

async fn recent_logs(State(state): State<AppState>, Query(query): Query<LogQuery>) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    match state.log.recent(limit).await {
        Ok(rows) => Json::<Vec<ActivityRecord>>(rows).into_response(),
        Err(e) => db_error(e),
    }
}

// ── Scheduler ───────────────────────────────────────────────────────────

async fn start_scheduler(State(state): State<AppState>) -> Response {
    match state.scheduler.start() {
        Ok(()) => Json(serde_json::json!({ "scheduler": state.scheduler.state() })).into_response(),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

async fn stop_scheduler(State(state): State<AppState>) -> Response {
    state.scheduler.stop();
    Json(serde_json::json!({ "scheduler": state.scheduler.state() })).into_response()
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("Event WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.hub))
}

async fn send_frame(socket: &mut WebSocket, frame: &WsMessage) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WS frame");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<EventHub>) {
    // Subscribe before the snapshot so nothing published in between is lost.
    let mut rx = hub.subscribe();

    let sync = WsMessage::EventsSync {
        events: hub.snapshot().await,
    };
    if !send_frame(&mut socket, &sync).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_frame(&mut socket, &WsMessage::Event { event }).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        let sync = WsMessage::EventsSync { events: hub.snapshot().await };
                        if !send_frame(&mut socket, &sync).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Event WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    debug!("Event WebSocket connection closed");
}
