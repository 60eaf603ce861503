use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::StudioConfig;
use crate::craft::{CraftOutcome, CraftStudio, OutputKind};
use crate::database::{GeneratedOutput, InterviewRecord, StudioDatabase};
use crate::events::StudioEvent;
use crate::interview::interviewers;
use crate::interview::state::{CollectedState, ConversationTurn, FixedFieldUpdate, SeedProfile};
use crate::interview::{InterviewEngine, InterviewMode, Interviewer, TurnRequest};
use crate::profile::{summarize, ExtractionQueue, TraitsSummary, UserTrait};
use crate::runtime::BackendRuntime;

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<InterviewEngine>,
    pub craft: Arc<CraftStudio>,
    pub db: Arc<StudioDatabase>,
    pub queue: Arc<ExtractionQueue>,
    pub auth: BackendAuthConfig,
    pub config: Arc<StudioConfig>,
    pub ws_events: broadcast::Sender<ApiEventEnvelope>,
}

#[derive(Debug, Clone)]
pub struct BackendAuthConfig {
    mode: AuthMode,
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Required,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiEventEnvelope {
    pub event_type: String,
    pub emitted_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct TurnRequestBody {
    messages: Vec<ConversationTurn>,
    mode: Option<String>,
    interviewer_id: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    #[serde(default)]
    force_complete: bool,
    seed_profile: Option<SeedProfile>,
}

#[derive(Debug, Serialize)]
struct TurnResponseBody {
    session_id: String,
    reply: String,
    is_completed: bool,
    collected: Option<CollectedState>,
    fixed_field_update: Option<FixedFieldUpdate>,
}

#[derive(Debug, Deserialize)]
struct AbandonSessionQuery {
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct AbandonResponse {
    abandoned: bool,
}

#[derive(Debug, Deserialize)]
struct SaveInterviewRequest {
    session_id: String,
    user_id: Option<String>,
    mode: String,
    interviewer_id: String,
    collected: CollectedState,
    messages: Vec<ConversationTurn>,
}

#[derive(Debug, Deserialize)]
struct ListInterviewsQuery {
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct TraitsResponse {
    traits: Vec<UserTrait>,
    summary: TraitsSummary,
}

#[derive(Debug, Deserialize)]
struct ReplaceTraitsRequest {
    traits: Vec<UserTrait>,
}

#[derive(Debug, Deserialize)]
struct ListOutputsQuery {
    user_id: Option<String>,
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateOutputRequest {
    user_id: String,
    kind: String,
    interview_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ArchiveResponse {
    archived: bool,
}

#[derive(Debug, Serialize)]
struct RedactedConfig {
    llm_api_url: String,
    llm_model: String,
    llm_api_key_set: bool,
    extraction_model: Option<String>,
    default_interviewer: String,
    default_mode: String,
    database_path: String,
}

pub async fn serve_backend(
    runtime: BackendRuntime,
    event_rx: flume::Receiver<StudioEvent>,
) -> Result<()> {
    let bind_addr = runtime
        .config
        .bind_addr
        .parse::<SocketAddr>()
        .context("Invalid bind address (expected host:port)")?;

    let auth = load_auth_config()?;

    let (ws_events, _) = broadcast::channel(512);

    let state = Arc::new(ServerState {
        engine: runtime.engine.clone(),
        craft: runtime.craft.clone(),
        db: runtime.db.clone(),
        queue: runtime.queue.clone(),
        auth,
        config: Arc::new(runtime.config.clone()),
        ws_events: ws_events.clone(),
    });

    spawn_event_bridge(event_rx, ws_events);

    let protected = Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config))
        .route("/interviewers", get(list_interviewers))
        .route("/interview/turn", post(interview_turn))
        .route("/interview/sessions/:id", delete(abandon_session))
        .route("/interviews", get(list_interviews).post(save_interview))
        .route("/interviews/:id", get(get_interview))
        .route(
            "/users/:id/traits",
            get(get_user_traits).put(replace_user_traits),
        )
        .route("/outputs", get(list_outputs).post(generate_output))
        .route("/outputs/:id", delete(archive_output))
        .route("/ws/events", get(ws_events_route))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let app = Router::new().nest("/v1", protected);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("Limn backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

fn spawn_event_bridge(
    event_rx: flume::Receiver<StudioEvent>,
    ws_events: broadcast::Sender<ApiEventEnvelope>,
) {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            let envelope = map_studio_event(event);
            let _ = ws_events.send(envelope);
        }
    });
}

fn map_studio_event(event: StudioEvent) -> ApiEventEnvelope {
    match event {
        StudioEvent::FixedFieldCollected {
            session_id,
            field,
            value,
        } => envelope(
            "fixed_field_collected",
            serde_json::json!({
                "session_id": session_id,
                "field": field,
                "value": value
            }),
        ),
        StudioEvent::TraitsChanged {
            owner_id,
            traits,
            new_ids,
            updated_ids,
            highlight_ms,
        } => envelope(
            "traits_changed",
            serde_json::json!({
                "owner_id": owner_id,
                "total": traits.len(),
                "traits": traits,
                "new_ids": new_ids,
                "updated_ids": updated_ids,
                "highlight_ms": highlight_ms
            }),
        ),
        StudioEvent::ExtractionFailed {
            owner_id,
            turn_index,
            error,
        } => envelope(
            "extraction_failed",
            serde_json::json!({
                "owner_id": owner_id,
                "turn_index": turn_index,
                "error": error
            }),
        ),
        StudioEvent::InterviewCompleted {
            session_id,
            mode,
            entry_count,
        } => envelope(
            "interview_completed",
            serde_json::json!({
                "session_id": session_id,
                "mode": mode,
                "entry_count": entry_count
            }),
        ),
        StudioEvent::OutputGenerated {
            output_id,
            user_id,
            kind,
        } => envelope(
            "output_generated",
            serde_json::json!({
                "output_id": output_id,
                "user_id": user_id,
                "kind": kind
            }),
        ),
    }
}

fn envelope(event_type: &str, payload: serde_json::Value) -> ApiEventEnvelope {
    ApiEventEnvelope {
        event_type: event_type.to_string(),
        emitted_at: Utc::now(),
        payload,
    }
}

fn load_auth_config() -> Result<BackendAuthConfig> {
    let mode = parse_auth_mode(std::env::var("LIMN_BACKEND_AUTH_MODE").ok())?;
    let token = std::env::var("LIMN_BACKEND_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if mode == AuthMode::Required && token.is_none() {
        return Err(anyhow!(
            "LIMN_BACKEND_TOKEN is required when auth mode is 'required'"
        ));
    }
    if mode == AuthMode::Disabled {
        tracing::warn!("Backend auth mode is disabled; all API routes are unauthenticated");
    }

    Ok(BackendAuthConfig { mode, token })
}

fn parse_auth_mode(raw: Option<String>) -> Result<AuthMode> {
    let normalized = raw
        .unwrap_or_else(|| "required".to_string())
        .trim()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "" | "required" | "on" | "enabled" | "true" => Ok(AuthMode::Required),
        "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
        other => Err(anyhow!(
            "Invalid LIMN_BACKEND_AUTH_MODE '{}'. Expected 'required' or 'disabled'",
            other
        )),
    }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &BackendAuthConfig) -> Result<(), StatusCode> {
    if auth.mode == AuthMode::Disabled {
        return Ok(());
    }
    let Some(token) = auth.token.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let expected = format!("Bearer {}", token);
    if auth_value.trim() != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_config(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<RedactedConfig>, (StatusCode, String)> {
    let config = &state.config;
    Ok(Json(RedactedConfig {
        llm_api_url: config.llm_api_url.clone(),
        llm_model: config.llm_model.clone(),
        llm_api_key_set: config
            .llm_api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false),
        extraction_model: config.extraction_model.clone(),
        default_interviewer: config.default_interviewer.clone(),
        default_mode: config.default_mode.clone(),
        database_path: config.database_path.clone(),
    }))
}

async fn list_interviewers() -> Json<Vec<Interviewer>> {
    Json(interviewers::all())
}

async fn interview_turn(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<TurnRequestBody>,
) -> Result<Json<TurnResponseBody>, (StatusCode, String)> {
    if body.messages.is_empty() {
        return Err(bad_request("messages cannot be empty".to_string()));
    }

    let mode = match body.mode.as_deref() {
        Some(raw) => InterviewMode::parse(raw)
            .ok_or_else(|| bad_request(format!("unknown interview mode '{}'", raw)))?,
        None => InterviewMode::resolve(&state.config.default_mode),
    };

    let interviewer_id = body
        .interviewer_id
        .as_deref()
        .unwrap_or(&state.config.default_interviewer);
    let interviewer = interviewers::get(interviewer_id)
        .ok_or_else(|| not_found(format!("interviewer '{}' not found", interviewer_id)))?;

    let session_id = body
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let owner_id = body
        .user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| session_id.clone());

    let outcome = state
        .engine
        .run_turn(TurnRequest {
            history: body.messages,
            mode,
            interviewer,
            session_id: session_id.clone(),
            owner_id,
            force_complete: body.force_complete,
            seed_profile: body.seed_profile,
        })
        .await
        .map_err(bad_gateway)?;

    Ok(Json(TurnResponseBody {
        session_id,
        reply: outcome.reply,
        is_completed: outcome.is_completed,
        collected: outcome.collected,
        fixed_field_update: outcome.fixed_field_update,
    }))
}

/// Drop any extraction work still queued for an abandoned session and shed
/// its worker. The owner key mirrors the turn route: the signed-in user id
/// when given, otherwise the guest session id.
async fn abandon_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    Query(query): Query<AbandonSessionQuery>,
) -> Json<AbandonResponse> {
    let owner_id = query
        .user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(session_id);
    state.queue.cancel(&owner_id);
    Json(AbandonResponse { abandoned: true })
}

async fn save_interview(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<SaveInterviewRequest>,
) -> Result<Json<InterviewRecord>, (StatusCode, String)> {
    if body.session_id.trim().is_empty() {
        return Err(bad_request("session_id cannot be empty".to_string()));
    }
    let mode = InterviewMode::parse(&body.mode)
        .ok_or_else(|| bad_request(format!("unknown interview mode '{}'", body.mode)))?;
    let interviewer = interviewers::get(&body.interviewer_id)
        .ok_or_else(|| not_found(format!("interviewer '{}' not found", body.interviewer_id)))?;

    // Saving the same session again overwrites it but keeps the original
    // creation time.
    let now = Utc::now();
    let created_at = state
        .db
        .get_interview(&body.session_id)
        .map_err(internal_error)?
        .map(|existing| existing.created_at)
        .unwrap_or(now);

    let record = InterviewRecord {
        id: body.session_id,
        user_id: body.user_id.filter(|id| !id.trim().is_empty()),
        mode: mode.as_str().to_string(),
        interviewer: interviewer.id.to_string(),
        status: "completed".to_string(),
        collected: body.collected,
        messages: body.messages,
        created_at,
        updated_at: now,
    };
    state.db.save_interview(&record).map_err(internal_error)?;
    Ok(Json(record))
}

async fn list_interviews(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListInterviewsQuery>,
) -> Result<Json<Vec<InterviewRecord>>, (StatusCode, String)> {
    let user_id = require_field(query.user_id, "user_id")?;
    state
        .db
        .list_interviews(&user_id)
        .map(Json)
        .map_err(internal_error)
}

async fn get_interview(
    State(state): State<Arc<ServerState>>,
    Path(interview_id): Path<String>,
) -> Result<Json<InterviewRecord>, (StatusCode, String)> {
    match state
        .db
        .get_interview(&interview_id)
        .map_err(internal_error)?
    {
        Some(record) => Ok(Json(record)),
        None => Err(not_found(format!("interview '{}' not found", interview_id))),
    }
}

async fn get_user_traits(
    State(state): State<Arc<ServerState>>,
    Path(owner_id): Path<String>,
) -> Result<Json<TraitsResponse>, (StatusCode, String)> {
    let (traits, summary) = state
        .db
        .load_traits_with_summary(&owner_id)
        .map_err(internal_error)?
        .unwrap_or_else(|| (Vec::new(), summarize(&[])));
    Ok(Json(TraitsResponse { traits, summary }))
}

async fn replace_user_traits(
    State(state): State<Arc<ServerState>>,
    Path(owner_id): Path<String>,
    Json(body): Json<ReplaceTraitsRequest>,
) -> Result<Json<TraitsResponse>, (StatusCode, String)> {
    let summary = summarize(&body.traits);
    state
        .db
        .save_traits(&owner_id, &body.traits, &summary)
        .map_err(internal_error)?;
    Ok(Json(TraitsResponse {
        traits: body.traits,
        summary,
    }))
}

async fn list_outputs(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListOutputsQuery>,
) -> Result<Json<Vec<GeneratedOutput>>, (StatusCode, String)> {
    let user_id = require_field(query.user_id, "user_id")?;
    let kind = match query.kind.as_deref() {
        Some(raw) => Some(
            OutputKind::parse(raw)
                .ok_or_else(|| bad_request(format!("unknown output kind '{}'", raw)))?,
        ),
        None => None,
    };
    state
        .db
        .list_outputs(&user_id, kind)
        .map(Json)
        .map_err(internal_error)
}

async fn generate_output(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<GenerateOutputRequest>,
) -> Result<Json<GeneratedOutput>, (StatusCode, String)> {
    if body.user_id.trim().is_empty() {
        return Err(bad_request("user_id cannot be empty".to_string()));
    }
    let kind = OutputKind::parse(&body.kind)
        .ok_or_else(|| bad_request(format!("unknown output kind '{}'", body.kind)))?;

    let outcome = match kind {
        OutputKind::Tagline => state
            .craft
            .generate_tagline(&body.user_id)
            .await
            .map_err(bad_gateway)?,
        OutputKind::Article => {
            let interview_id = require_field(body.interview_id, "interview_id")?;
            let interview = require_interview(&state, &interview_id)?;
            state
                .craft
                .generate_article(&body.user_id, &interview)
                .await
                .map_err(bad_gateway)?
        }
    };

    match outcome {
        CraftOutcome::Generated(output) => Ok(Json(output)),
        CraftOutcome::RateLimited { next_available_at } => Err((
            StatusCode::TOO_MANY_REQUESTS,
            format!(
                "daily {} limit reached; next available at {}",
                kind.as_str(),
                next_available_at.to_rfc3339()
            ),
        )),
        CraftOutcome::NotEnoughTraits { have, need } => Err(bad_request(format!(
            "need at least {} traits to generate a tagline (currently {})",
            need, have
        ))),
    }
}

async fn archive_output(
    State(state): State<Arc<ServerState>>,
    Path(output_id): Path<String>,
) -> Result<Json<ArchiveResponse>, (StatusCode, String)> {
    let archived = state
        .db
        .archive_output(&output_id)
        .map_err(internal_error)?;
    if !archived {
        return Err(not_found(format!("output '{}' not found", output_id)));
    }
    Ok(Json(ArchiveResponse { archived: true }))
}

async fn ws_events_route(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(state, socket))
}

async fn handle_events_socket(state: Arc<ServerState>, mut socket: WebSocket) {
    let mut rx = state.ws_events.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(serialized) => serialized,
                            Err(error) => {
                                tracing::warn!("Failed to serialize websocket event: {}", error);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn require_interview(
    state: &ServerState,
    interview_id: &str,
) -> Result<InterviewRecord, (StatusCode, String)> {
    state
        .db
        .get_interview(interview_id)
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("interview '{}' not found", interview_id)))
}

fn require_field(value: Option<String>, name: &str) -> Result<String, (StatusCode, String)> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_request(format!("'{}' is required", name)))
}

fn bad_request(message: String) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message)
}

fn not_found(message: String) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, message)
}

fn internal_error(error: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

fn bad_gateway(error: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::BAD_GATEWAY, error.to_string())
}
