use axum::{
    extract::{Query, State},
    response::Response,
};
use std::sync::Arc;

use crate::charts;
use crate::AppState;

use super::{html_page, load_metrics, MetricsParams};

// ─── GET /charts ─────────────────────────────────────────────────
/// Response-time and status-class charts for one URL; the overview page
/// when no `url` is given.

pub async fn get_charts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsParams>,
) -> Response {
    match load_metrics(&state, &params).await {
        Ok(Some((url, records))) => html_page(charts::render_page(&url, &records)),
        Ok(None) => html_page(charts::render_overview(&state.urls)),
        Err(err) => err.into_text_response(),
    }
}
