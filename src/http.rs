//! Client-facing `/v1/*` surface and the `/admin/*` control plane.
//! Redesign (§9): the teacher's Unix-socket JSON-RPC transport is
//! replaced by networked `axum` routes (the sibling `rust/gateway`
//! subproject in the teacher's own source repo already depends on
//! `axum`) — the logic each route drives is unchanged, only the
//! transport differs.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::Principal;
use crate::dispatcher::{DispatchOutcome, DispatchRequest, Dispatcher};
use crate::error::GatewayError;
use crate::models::ProviderType;
use crate::payload::{extract_model, extract_session_id, extract_text_fragments};
use crate::state::GatewayState;

/// Request bodies larger than this are rejected with 413 before they
/// reach the dispatcher (§6).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/responses", post(responses_handler))
        .route("/v1/*rest", post(fallback_handler))
        .route("/admin/circuits", get(admin_circuits_get))
        .route("/admin/circuits/:provider_id/reset", post(admin_circuits_reset))
        .route("/admin/log-level", get(admin_log_level_get).post(admin_log_level_set))
        .route("/admin/usage/session/:session_id", get(admin_session_usage))
        .route("/admin/leaderboard", get(admin_leaderboard))
        .route("/admin/version", get(admin_version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Client-facing data plane ─────────────────────────────────────────

async fn messages_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch_entry(state, headers, body, "/v1/messages", ProviderType::Claude).await
}

async fn chat_completions_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch_entry(state, headers, body, "/v1/chat/completions", ProviderType::Codex).await
}

async fn responses_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch_entry(state, headers, body, "/v1/responses", ProviderType::Codex).await
}

/// Any other `/v1/*` path. Provider dialect defaults to Codex (the
/// OpenAI-compatible family is the broader surface) unless the caller
/// pins it explicitly with `x-provider-type: claude`.
async fn fallback_handler(
    State(state): State<Arc<GatewayState>>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider_type = match headers.get("x-provider-type").and_then(|v| v.to_str().ok()) {
        Some("claude") => ProviderType::Claude,
        _ => ProviderType::Codex,
    };
    let path = format!("/v1/{rest}");
    dispatch_entry(state, headers, body, &path, provider_type).await
}

async fn dispatch_entry(
    state: Arc<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
    upstream_path: &str,
    provider_type: ProviderType,
) -> Response {
    if body.len() > MAX_BODY_BYTES {
        return GatewayError::PayloadTooLarge.into_response();
    }

    let principal = match authenticate_proxy(&state, &headers) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    let json_body: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return GatewayError::BadRequest(e.to_string()).into_response(),
    };

    let requested_model = extract_model(&json_body).unwrap_or_default();
    let session_id = extract_session_id(&json_body);
    let text_fragments = extract_text_fragments(&json_body);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = DispatchRequest {
        principal,
        requested_model,
        provider_type,
        session_id,
        upstream_path: upstream_path.to_string(),
        body: json_body,
        user_agent,
        text_fragments,
    };

    let dispatcher = Dispatcher::new(state);
    match dispatcher.dispatch(request).await {
        DispatchOutcome::Blocked(err) => err.into_response(),
        DispatchOutcome::Forwarded {
            status,
            content_type,
            body,
        } => {
            let mut response = Response::builder()
                .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
            if let Some(ct) = content_type {
                response = response.header(axum::http::header::CONTENT_TYPE, ct);
            }
            response.body(body).unwrap_or_else(|_| {
                GatewayError::Other(anyhow::anyhow!("failed to build response")).into_response()
            })
        }
    }
}

fn authenticate_proxy(state: &GatewayState, headers: &HeaderMap) -> Result<Principal, GatewayError> {
    let token = bearer_token(headers).ok_or(GatewayError::AuthFailed)?;
    state.auth.resolve_proxy_checked(&state.store, token)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// ── Control plane ─────────────────────────────────────────────────────

fn authenticate_admin(state: &GatewayState, jar: &CookieJar, headers: &HeaderMap) -> Result<Principal, GatewayError> {
    let token = jar
        .get("session")
        .map(|c| c.value().to_string())
        .or_else(|| bearer_token(headers).map(str::to_string))
        .ok_or(GatewayError::AuthFailed)?;
    let principal = state
        .auth
        .resolve_control_plane(&state.store, &token)
        .ok_or(GatewayError::AuthFailed)?;
    if principal.role() != crate::models::Role::Admin {
        return Err(GatewayError::AuthFailed);
    }
    Ok(principal)
}

async fn admin_circuits_get(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = authenticate_admin(&state, &jar, &headers) {
        return e.into_response();
    }
    let snapshot = state.circuits.snapshot();
    let body: Vec<Value> = snapshot
        .into_iter()
        .map(|(id, circuit_state)| json!({ "provider_id": id, "state": circuit_state.to_string() }))
        .collect();
    Json(json!({ "providers": body })).into_response()
}

async fn admin_circuits_reset(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(provider_id): Path<Uuid>,
) -> Response {
    if let Err(e) = authenticate_admin(&state, &jar, &headers) {
        return e.into_response();
    }
    state.circuits.reset(provider_id);
    Json(json!({ "ok": true, "provider_id": provider_id })).into_response()
}

async fn admin_log_level_get(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = authenticate_admin(&state, &jar, &headers) {
        return e.into_response();
    }
    Json(json!({ "level": state.log_controller.current() })).into_response()
}

#[derive(serde::Deserialize)]
struct SetLogLevel {
    level: String,
}

async fn admin_log_level_set(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(payload): Json<SetLogLevel>,
) -> Response {
    if let Err(e) = authenticate_admin(&state, &jar, &headers) {
        return e.into_response();
    }
    match state.log_controller.set(&payload.level) {
        Ok(()) => Json(json!({ "ok": true, "level": payload.level })).into_response(),
        Err(e) => GatewayError::BadRequest(e.to_string()).into_response(),
    }
}

async fn admin_session_usage(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(e) = authenticate_admin(&state, &jar, &headers) {
        return e.into_response();
    }
    let recorder = crate::usage::UsageRecorder::new(&state.store);
    match recorder.session_aggregate(&session_id) {
        Ok(Some(agg)) => Json(json!({
            "session_id": session_id,
            "request_count": agg.request_count,
            "input_tokens": agg.input_tokens,
            "output_tokens": agg.output_tokens,
            "cache_create_tokens": agg.cache_create_tokens,
            "cache_read_tokens": agg.cache_read_tokens,
            "total_cost_usd": agg.total_cost_usd,
            "total_duration_ms": agg.total_duration_ms,
            "distinct_providers": agg.distinct_providers,
            "distinct_models": agg.distinct_models,
        }))
        .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "session_id": session_id, "found": false }))).into_response(),
        Err(e) => GatewayError::Other(e).into_response(),
    }
}

#[derive(serde::Deserialize)]
struct LeaderboardQuery {
    limit: Option<u32>,
}

/// Today's per-user spend ranking, highest spender first (§6).
async fn admin_leaderboard(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    if let Err(e) = authenticate_admin(&state, &jar, &headers) {
        return e.into_response();
    }
    let recorder = crate::usage::UsageRecorder::new(&state.store);
    match recorder.leaderboard_today(query.limit.unwrap_or(20)) {
        Ok(entries) => {
            let body: Vec<Value> = entries
                .into_iter()
                .map(|e| {
                    json!({
                        "user_id": e.user_id,
                        "user_name": e.user_name,
                        "request_count": e.request_count,
                        "total_cost_usd": e.total_cost_usd,
                    })
                })
                .collect();
            Json(json!({ "leaderboard": body })).into_response()
        }
        Err(e) => GatewayError::Other(e).into_response(),
    }
}

async fn admin_version() -> Response {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") })).into_response()
}
