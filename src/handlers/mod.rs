pub mod charts;
pub mod metrics;
pub mod window;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::store::{MetricQuery, MetricRecord, StoreError};
use crate::AppState;

// ─── Shared query parameters ─────────────────────────────────────

/// `?url=&from=&to=` as sent by the dashboard. Bounds are unix seconds
/// and stay strings here so a bad value can be reported by name.
#[derive(Debug, Default, Deserialize)]
pub struct MetricsParams {
    pub url: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Validates the request against the allow-list and window policy, then
/// loads the records. `Ok(None)` means no `url` was asked for.
pub(crate) async fn load_metrics(
    state: &AppState,
    params: &MetricsParams,
) -> Result<Option<(String, Vec<MetricRecord>)>, AppError> {
    let url = match params.url.as_deref() {
        None | Some("") => return Ok(None),
        Some(url) => url,
    };
    if !state.urls.iter().any(|u| u == url) {
        return Err(AppError::InvalidUrl(url.to_string()));
    }

    let from = window::parse_bound("from", params.from.as_deref())?;
    let to = window::parse_bound("to", params.to.as_deref())?;
    let (from, to) = window::resolve(from, to, chrono::Utc::now())?;

    let records = state
        .store
        .query_all(MetricQuery {
            url: url.to_string(),
            from,
            to,
        })
        .await?;

    Ok(Some((url.to_string(), records)))
}

// ─── GET /ping ───────────────────────────────────────────────────

pub async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "pong" }))
}

// ─── GET / ───────────────────────────────────────────────────────

pub async fn overview(State(state): State<Arc<AppState>>) -> Response {
    html_page(crate::charts::render_overview(&state.urls))
}

/// Wraps a rendered template; a render failure becomes a plain-text 500.
pub(crate) fn html_page(rendered: askama::Result<String>) -> Response {
    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(err) => AppError::from(err).into_text_response(),
    }
}

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    InvalidUrl(String),
    BadRequest(String),
    Store(StoreError),
    Render(askama::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<askama::Error> for AppError {
    fn from(err: askama::Error) -> Self {
        Self::Render(err)
    }
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::InvalidUrl(url) => (StatusCode::BAD_REQUEST, format!("invalid url: {url}")),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Store(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Self::Render(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("render failed: {err}")),
        }
    }

    /// Plain-text rendering for the HTML pages.
    pub fn into_text_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }
        (status, format!("failed to get metrics: {message}")).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
