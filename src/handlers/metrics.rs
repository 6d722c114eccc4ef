use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::store::MetricRecord;
use crate::AppState;

use super::{load_metrics, AppError, MetricsParams};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MetricsResponse {
    Urls { urls: Vec<String> },
    Metrics { metrics: Vec<MetricRecord> },
}

// ─── GET /metrics ────────────────────────────────────────────────
/// Without `url`: the configured allow-list. With `url`: the bucketed
/// records in the requested window, ascending by timestamp.

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<MetricsResponse>, AppError> {
    match load_metrics(&state, &params).await? {
        None => Ok(Json(MetricsResponse::Urls {
            urls: state.urls.clone(),
        })),
        Some((_, metrics)) => Ok(Json(MetricsResponse::Metrics { metrics })),
    }
}
