use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Health ──────────────────────────────────────────────
        .route("/ping", get(handlers::ping))
        // ── Reporting ───────────────────────────────────────────
        .route("/metrics", get(handlers::metrics::get_metrics))
        .route("/charts", get(handlers::charts::get_charts))
        .route("/", get(handlers::overview))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    use super::*;
    use crate::prober::ProbeSuccess;
    use crate::store::{BucketWidth, MemoryBackend, MetricStore};

    const A: &str = "http://a.test/";
    const A_ENCODED: &str = "http%3A%2F%2Fa.test%2F";

    async fn state() -> Arc<AppState> {
        let store = MetricStore::new(Arc::new(MemoryBackend::new("test")), BucketWidth::default());
        store
            .ingest(
                Utc.timestamp_opt(1000, 0).unwrap(),
                &[
                    ProbeSuccess {
                        url: A.into(),
                        response_time: Duration::from_micros(100_000),
                        status: 200,
                    },
                    ProbeSuccess {
                        url: A.into(),
                        response_time: Duration::from_micros(50_000),
                        status: 500,
                    },
                ],
            )
            .await
            .unwrap();

        Arc::new(AppState {
            store,
            urls: vec![A.to_string(), "http://b.test/".to_string()],
        })
    }

    async fn get(uri: &str) -> (StatusCode, String) {
        let app = create_router(state().await);
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let (status, body) = get(uri).await;
        (status, serde_json::from_str(&body).unwrap())
    }

    #[tokio::test]
    async fn ping_pongs() {
        let (status, body) = get_json("/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "pong");
    }

    #[tokio::test]
    async fn metrics_without_url_lists_allow_list() {
        let (status, body) = get_json("/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["urls"][0], A);
        assert_eq!(body["urls"][1], "http://b.test/");
    }

    #[tokio::test]
    async fn metrics_returns_records_with_durable_field_names() {
        let (status, body) = get_json(&format!("/metrics?url={A_ENCODED}&from=800&to=1000")).await;
        assert_eq!(status, StatusCode::OK);

        let metrics = body["metrics"].as_array().unwrap();
        assert_eq!(metrics.len(), 1);
        let record = &metrics[0];
        assert_eq!(record["url"], A);
        assert_eq!(record["timestamp"], 900);
        assert_eq!(record["count"], 2);
        assert_eq!(record["count_2xx"], 1);
        assert_eq!(record["count_5xx"], 1);
        assert_eq!(record["response_time"], 150_000);
    }

    #[tokio::test]
    async fn unknown_url_is_rejected() {
        let (status, body) = get_json("/metrics?url=http%3A%2F%2Fevil.test%2F").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid url: http://evil.test/");
    }

    #[tokio::test]
    async fn unparsable_bounds_are_rejected() {
        let (status, body) = get_json(&format!("/metrics?url={A_ENCODED}&from=soon")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("time from invalid"));
    }

    #[tokio::test]
    async fn earliest_to_is_a_bad_request() {
        let earliest = chrono::DateTime::<Utc>::MIN_UTC.timestamp();
        let (status, body) = get_json(&format!("/metrics?url={A_ENCODED}&to={earliest}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("time to invalid"));
    }

    #[tokio::test]
    async fn charts_render_html() {
        let (status, body) = get(&format!("/charts?url={A_ENCODED}&from=800&to=1000")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<svg"));
        assert!(body.contains("Response Status for"));
        assert!(body.contains("a.test"));

        let (status, body) = get("/charts").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Monitored URLs"));

        let (status, body) = get("/charts?url=nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("invalid url"));
    }

    #[tokio::test]
    async fn responses_carry_timing_headers() {
        let app = create_router(state().await);
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("X-Response-Time-Us"));
        assert!(response.headers().contains_key("Server-Timing"));
    }
}
