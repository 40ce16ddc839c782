// Copyright 2026 Facsimile Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP REST API for Facsimile.
//!
//! Thin JSON surface over [`Pipeline`]: clone a URL, refine a document,
//! or capture a manifest for diagnostics. Fatal errors come back as
//! `{"error": {"code", "message"}}` with a 4xx/5xx status.

use crate::pipeline::Pipeline;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use facsimile::{CloneError, CloneResult, VisualManifest};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, Instrument};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

#[derive(Debug, Deserialize)]
pub struct CloneBody {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct RefineBody {
    pub html: String,
    pub instruction: String,
}

/// A fatal request error rendered as JSON.
pub struct ApiError(CloneError);

impl From<CloneError> for ApiError {
    fn from(e: CloneError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(CloneError::InvalidInput(rejection.body_text()))
    }
}

/// HTTP status for a fatal error.
pub fn status_for(error: &CloneError) -> StatusCode {
    match error {
        CloneError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CloneError::Navigation { .. } => StatusCode::BAD_GATEWAY,
        CloneError::Blocked { .. } => StatusCode::FORBIDDEN,
        CloneError::RenderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CloneError::EmptyManifest => StatusCode::UNPROCESSABLE_ENTITY,
        CloneError::BundleTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.0.code(), "message": self.0.to_string() }
        });
        (status_for(&self.0), Json(body)).into_response()
    }
}

/// Build the axum Router with all REST endpoints.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/clone", post(handle_clone))
        .route("/api/v1/refine", post(handle_refine))
        .route("/api/v1/capture", post(handle_capture))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until the process is stopped.
pub async fn start(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!("REST API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_clone(
    State(state): State<AppState>,
    body: Result<Json<CloneBody>, JsonRejection>,
) -> Result<Json<CloneResult>, ApiError> {
    let Json(body) = body?;
    let span = tracing::info_span!("clone", request_id = %uuid::Uuid::new_v4(), url = %body.url);
    let result = state.pipeline.clone_url(&body.url).instrument(span).await?;
    Ok(Json(result))
}

async fn handle_refine(
    State(state): State<AppState>,
    body: Result<Json<RefineBody>, JsonRejection>,
) -> Result<Json<CloneResult>, ApiError> {
    let Json(body) = body?;
    let span = tracing::info_span!("refine", request_id = %uuid::Uuid::new_v4());
    let result = state
        .pipeline
        .refine(&body.html, &body.instruction)
        .instrument(span)
        .await?;
    Ok(Json(result))
}

async fn handle_capture(
    State(state): State<AppState>,
    body: Result<Json<CloneBody>, JsonRejection>,
) -> Result<Json<VisualManifest>, ApiError> {
    let Json(body) = body?;
    let span = tracing::info_span!("capture", request_id = %uuid::Uuid::new_v4(), url = %body.url);
    let manifest = state
        .pipeline
        .capture_manifest(&body.url)
        .instrument(span)
        .await?;
    Ok(Json(manifest))
}
