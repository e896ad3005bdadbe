// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `POST /proxy/execute` and the HITL reviewer endpoints (§6).
//!
//! No business logic lives here: every handler is a thin translation from
//! HTTP to an application-service call and back. Security headers, the body
//! size cap, and rate limiting are applied as middleware in [`app`] so they
//! cover every route uniformly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use crate::application::hitl_gateway::HitlGateway;
use crate::application::pipeline::{ExecuteRequest, ExecutionPipeline, PipelineError};
use crate::domain::agent::SponsorId;
use crate::domain::hitl::{HitlRequestId, HitlStatus};
use crate::infrastructure::rate_limiter::RateLimiter;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const AUTH_PATH_PREFIX: &str = "/auth";

pub struct AppState {
    pub pipeline: Arc<ExecutionPipeline>,
    pub hitl: Arc<HitlGateway>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limit_default_rpm: u32,
    pub rate_limit_auth_rpm: u32,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/proxy/execute", post(execute))
        .route("/hitl/pending", get(list_pending))
        .route("/hitl/:id/decide", post(decide))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn(security_headers))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}

async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("referrer-policy", HeaderValue::from_static("strict-origin-when-cross-origin"));
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    response
}

fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| connect_info.map(|ci| ci.0.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Every request passes through here before routing (§6): counters scoped
/// to `(client_ip, hashed_auth_prefix, path, minute_window)`, 10 rpm on
/// `/auth*` paths, 60 rpm elsewhere, 429 with `Retry-After` on burst.
async fn rate_limit(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let connect_info = req.extensions().get::<ConnectInfo<SocketAddr>>().cloned();
    let path = req.uri().path().to_string();
    let ip = client_ip(req.headers(), connect_info.as_ref());
    let auth = req.headers().get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let limit = if path.starts_with(AUTH_PATH_PREFIX) {
        state.rate_limit_auth_rpm
    } else {
        state.rate_limit_default_rpm
    };
    let key = RateLimiter::scope_key(&ip, auth, &path);
    let decision = state.rate_limiter.check(&key, limit).await;
    if !decision.allowed {
        let mut response =
            (StatusCode::TOO_MANY_REQUESTS, Json(ErrorBody { error: "rate limit exceeded".into() })).into_response();
        if let Ok(value) = HeaderValue::from_str(&decision.retry_after_secs.to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
        return response;
    }
    next.run(req).await
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn execute(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(mut request): Json<ExecuteRequest>,
) -> Response {
    if request.client_ip.is_none() {
        request.client_ip = Some(client_ip(&headers, connect_info.as_ref()));
    }
    if request.idempotency_key.is_none() {
        request.idempotency_key = headers.get("x-idempotency-key").and_then(|v| v.to_str().ok()).map(|v| v.to_string());
    }

    match state.pipeline.execute(request).await {
        Ok(response) => {
            let request_id = response.request_id;
            let mut http_response = (StatusCode::OK, Json(response)).into_response();
            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                http_response.headers_mut().insert("x-request-id", value);
            }
            http_response
        }
        Err(PipelineError::AgentNotFound) => {
            (StatusCode::NOT_FOUND, Json(ErrorBody { error: "agent not found".into() })).into_response()
        }
        Err(PipelineError::Conflict) => (
            StatusCode::CONFLICT,
            Json(ErrorBody { error: "an execution with this idempotency key is already in flight".into() }),
        )
            .into_response(),
        Err(PipelineError::Infra(message)) => {
            tracing::error!(error = %message, "pipeline infrastructure error");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: "internal error".into() })).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListPendingQuery {
    sponsor_id: Uuid,
}

async fn list_pending(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<ListPendingQuery>,
) -> Response {
    match state.hitl.list_pending(SponsorId(query.sponsor_id)).await {
        Ok(requests) => Json(requests).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to list pending HITL requests");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: "internal error".into() })).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DecideRequest {
    decider: String,
    approved: bool,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct DecideResponse {
    status: HitlStatus,
}

async fn decide(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(body): Json<DecideRequest>) -> Response {
    match state.hitl.decide(HitlRequestId(id), body.decider, body.approved, body.note).await {
        Ok((status, _event)) => Json(DecideResponse { status }).into_response(),
        Err(crate::application::hitl_gateway::HitlError::NotFound) => {
            (StatusCode::NOT_FOUND, Json(ErrorBody { error: "HITL request not found".into() })).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to apply HITL decision");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: "internal error".into() })).into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 10.0.0.1"));
        assert_eq!(client_ip(&headers, None), "203.0.113.5");
    }

    #[test]
    fn client_ip_falls_back_to_unknown_with_no_signal() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, None), "unknown");
    }
}
