use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging::{LogEntry, RequestLogger, SharedLogger};
use crate::proxy::{self, UpstreamDispatcher};
use crate::translate::request::{client_to_upstream, parse_client_request};
use crate::translate::response::{error_to_client, upstream_to_client};
use crate::translate::upstream_types::UpstreamRequest;

use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1_000;

pub struct AppState {
    pub config: ProxyConfig,
    pub dispatcher: UpstreamDispatcher,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/chat/completions", post(handle_chat_completions))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/logs", get(handle_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let log = state.logger.for_request(&request_id);

    let mut response = translate_and_forward(&state, &headers, &body, log).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

async fn translate_and_forward(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    body: &[u8],
    log: RequestLogger,
) -> Response {
    // The client's Authorization is accepted as-is and never forwarded.
    if headers.get(AUTHORIZATION).is_none() {
        log.debug("server", "Request has no Authorization header");
    }

    let upstream_req = match parse_client_request(body)
        .and_then(|req| client_to_upstream(&req, &state.config.deployments))
    {
        Ok(r) => r,
        Err(e) => return error_response(&e, &log),
    };

    let prompt_chars: usize = upstream_req
        .body
        .messages
        .iter()
        .filter_map(|m| m.content.as_ref())
        .map(|c| c.as_text().len())
        .sum();

    log.info_with_context(
        "server",
        format!(
            "Request: model={} deployment={} streaming={} messages={}",
            upstream_req.client_model,
            upstream_req.deployment,
            upstream_req.is_streaming(),
            upstream_req.body.messages.len()
        ),
        serde_json::json!({
            "model": upstream_req.client_model,
            "deployment": upstream_req.deployment,
            "streaming": upstream_req.is_streaming(),
            "messages": upstream_req.body.messages.len(),
            "prompt_chars": prompt_chars,
        }),
    );

    if upstream_req.is_streaming() {
        handle_streaming(state, &upstream_req, log).await
    } else {
        handle_non_streaming(state, &upstream_req, log).await
    }
}

async fn handle_non_streaming(
    state: &Arc<AppState>,
    req: &UpstreamRequest,
    log: RequestLogger,
) -> Response {
    match state.dispatcher.complete(req, &log).await {
        Ok(upstream_resp) => {
            let resp = upstream_to_client(&upstream_resp, &req.client_model);
            log.info(
                "server",
                format!("Completed: choices={}", resp.choices.len()),
            );
            Json(resp).into_response()
        }
        Err(e) => error_response(&e, &log),
    }
}

async fn handle_streaming(
    state: &Arc<AppState>,
    req: &UpstreamRequest,
    log: RequestLogger,
) -> Response {
    // Failures before the first byte are reported as a plain JSON error.
    let events = match state.dispatcher.stream(req, &log).await {
        Ok(s) => s,
        Err(e) => return error_response(&e, &log),
    };

    let frames = proxy::relay(
        events,
        &req.client_model,
        state.dispatcher.idle_timeout(),
        log,
    );

    let event_stream = frames
        .map(|frame| -> std::result::Result<Event, Infallible> {
            Ok(Event::default().data(frame.to_sse_data()))
        });

    Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn error_response(err: &ProxyError, log: &RequestLogger) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);

    if err.is_client_error() {
        log.warn("server", format!("Rejected request: {err}"));
    } else {
        log.error("server", format!("Request failed with {}: {err}", status.as_u16()));
    }

    (status, Json(error_to_client(err))).into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut entries: Vec<(&String, &String)> = state.config.deployments.iter().collect();
    entries.sort();

    let models: Vec<serde_json::Value> = entries
        .into_iter()
        .map(|(model, deployment)| {
            serde_json::json!({
                "id": model,
                "object": "model",
                "owned_by": deployment,
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    Json(state.logger.recent(limit))
}
