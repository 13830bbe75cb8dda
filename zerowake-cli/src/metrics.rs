use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use tokio::net::TcpListener;

use zerowake_core::{ControlPlane, FunctionId, StatusReport};

lazy_static! {
    pub static ref INVOCATIONS: IntCounterVec = register_int_counter_vec!(
        "zerowake_invocations_total",
        "Invocations handled by the gateway, by outcome",
        &["function_id", "outcome"]
    )
    .unwrap();
    pub static ref INVOCATION_DURATION: HistogramVec = register_histogram_vec!(
        "zerowake_invocation_duration_seconds",
        "End-to-end invocation latency including any scale-up wait",
        &["function_id"],
        vec![0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();
    pub static ref COLD_START_WAIT: HistogramVec = register_histogram_vec!(
        "zerowake_cold_start_wait_seconds",
        "Latency of invocations that waited on a scale-up",
        &["function_id"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0] // Pod start times
    )
    .unwrap();
    pub static ref READY_REPLICAS: IntGaugeVec = register_int_gauge_vec!(
        "zerowake_ready_replicas",
        "Ready replicas reported by the orchestration platform",
        &["function_id"]
    )
    .unwrap();
    pub static ref DESIRED_REPLICAS: IntGaugeVec = register_int_gauge_vec!(
        "zerowake_desired_replicas",
        "Desired replicas reported by the orchestration platform",
        &["function_id"]
    )
    .unwrap();
    pub static ref SCALE_WAITERS: IntGaugeVec = register_int_gauge_vec!(
        "zerowake_scale_waiters",
        "Callers waiting on an in-flight scale-up",
        &["function_id"]
    )
    .unwrap();
}

pub fn record_invocation(id: &FunctionId, outcome: &str, elapsed: Duration) {
    INVOCATIONS
        .with_label_values(&[id.as_str(), outcome])
        .inc();
    INVOCATION_DURATION
        .with_label_values(&[id.as_str()])
        .observe(elapsed.as_secs_f64());
}

/// Copy gauges from a status report. Functions missing from the report are
/// dropped so deleted functions stop being exported.
pub fn refresh(report: &StatusReport) {
    READY_REPLICAS.reset();
    DESIRED_REPLICAS.reset();
    SCALE_WAITERS.reset();
    for function in &report.functions {
        let id = function.id.as_str();
        if let Some(ready) = function.ready_replicas {
            READY_REPLICAS.with_label_values(&[id]).set(i64::from(ready));
        }
        if let Some(desired) = function.desired_replicas {
            DESIRED_REPLICAS.with_label_values(&[id]).set(i64::from(desired));
        }
        SCALE_WAITERS
            .with_label_values(&[id])
            .set(function.waiters as i64);
    }
}

/// Router serving the Prometheus text format on `/metrics`.
pub fn metrics_router(plane: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(plane)
}

async fn scrape(State(plane): State<Arc<ControlPlane>>) -> impl IntoResponse {
    refresh(&plane.status().await);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics_handler(),
    )
}

/// Start the metrics server in a background task.
pub fn start_metrics_server(port: u16, plane: Arc<ControlPlane>) {
    // Force initialization of metrics
    lazy_static::initialize(&INVOCATIONS);
    lazy_static::initialize(&INVOCATION_DURATION);
    lazy_static::initialize(&COLD_START_WAIT);
    lazy_static::initialize(&READY_REPLICAS);
    lazy_static::initialize(&DESIRED_REPLICAS);
    lazy_static::initialize(&SCALE_WAITERS);

    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("Failed to bind metrics server: {}", e);
                return;
            }
        };
        tracing::info!("Metrics server starting on {}", addr);
        if let Err(e) = axum::serve(listener, metrics_router(plane)).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });
}

fn metrics_handler() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("Encoding error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;
    use zerowake_core::{ConfigLoader, FunctionStatus, InMemoryOrchestrator, Phase, ScaleState};

    const CONFIG: &str = r#"
functions:
  - id: scraped
    code: "def main():\n    return 'hello'\n"
    runtime: python3.9
    minReplicas: 0
    maxReplicas: 1
"#;

    fn status(id: &str, ready: Option<u32>, waiters: usize) -> FunctionStatus {
        FunctionStatus {
            id: FunctionId::new(id).unwrap(),
            generation: 1,
            phase: Phase::Ready,
            observed_generation: Some(1),
            last_error: None,
            last_reconciled_ms: None,
            scale_state: Some(ScaleState::Ready),
            desired_replicas: ready,
            ready_replicas: ready,
            endpoint: None,
            waiters,
            scale_ups: 1,
        }
    }

    #[test]
    fn test_refresh_exports_and_prunes_gauges() {
        refresh(&StatusReport {
            functions: vec![status("metrics-a", Some(2), 3), status("metrics-b", None, 0)],
        });
        assert_eq!(READY_REPLICAS.with_label_values(&["metrics-a"]).get(), 2);
        assert_eq!(SCALE_WAITERS.with_label_values(&["metrics-a"]).get(), 3);
        assert!(metrics_handler().contains("zerowake_scale_waiters"));

        refresh(&StatusReport { functions: vec![] });
        assert!(!metrics_handler().contains("metrics-a"));
    }

    #[test]
    fn test_record_invocation() {
        let id = FunctionId::new("metrics-c").unwrap();
        record_invocation(&id, "success", Duration::from_millis(12));
        record_invocation(&id, "ScaleTimeout", Duration::from_secs(1));
        assert_eq!(
            INVOCATIONS
                .with_label_values(&["metrics-c", "success"])
                .get(),
            1
        );
        assert_eq!(
            INVOCATION_DURATION
                .with_label_values(&["metrics-c"])
                .get_sample_count(),
            2
        );
    }

    #[tokio::test]
    async fn test_metrics_route_serves_text_format() {
        let config = ConfigLoader::load_string(CONFIG).unwrap();
        let backend = Arc::new(InMemoryOrchestrator::new(Duration::ZERO));
        let plane = ControlPlane::new(config.clone(), backend).unwrap();
        plane.seed(config.functions);
        let id = FunctionId::new("scraped").unwrap();
        record_invocation(&id, "success", Duration::from_millis(3));
        let app = metrics_router(Arc::new(plane));

        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("zerowake_invocations_total"));
        assert!(body.contains("function_id=\"scraped\""));

        let missing = app
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
