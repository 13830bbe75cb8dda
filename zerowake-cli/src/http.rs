// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! HTTP surface of the gateway daemon.
//!
//! Routes `/invoke/{function_id}/...` through the admission gateway, serves
//! the status surface, and exposes the desired-state API used by
//! `zw apply` / `zw delete`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue, Request, Response, StatusCode},
    response::IntoResponse,
    routing::{any, get, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use zerowake_core::{
    ControlPlane, FunctionId, FunctionSpec, Invocation, InvokeError, RawFunctionSpec,
};

use crate::metrics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Largest invocation payload accepted by the gateway.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Router state shared across handlers.
#[derive(Clone)]
struct AppState {
    plane: Arc<ControlPlane>,
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct Applied {
    id: FunctionId,
    generation: u64,
}

pub fn router(plane: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/invoke/{function_id}", any(invoke_root))
        .route("/invoke/{function_id}/{*path}", any(invoke_path))
        .route("/status", get(status_all))
        .route("/status/{function_id}", get(status_one))
        .route("/functions", get(list_functions))
        .route(
            "/functions/{function_id}",
            put(put_function).delete(delete_function),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { plane })
}

pub async fn serve(
    port: u16,
    plane: Arc<ControlPlane>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Gateway listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(plane))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn error_response(status: StatusCode, error: &'static str, message: String) -> Response<Body> {
    (status, Json(ErrorBody { error, message })).into_response()
}

/// Status code for each caller-visible invocation error.
pub fn invoke_error_status(error: &InvokeError) -> StatusCode {
    match error {
        InvokeError::FunctionNotFound(_) => StatusCode::NOT_FOUND,
        InvokeError::ScaleTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        InvokeError::ScaleError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InvokeError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
    }
}

async fn invoke_root(
    State(state): State<AppState>,
    Path(function_id): Path<String>,
    req: Request<Body>,
) -> Response<Body> {
    invoke(state, function_id, String::new(), req).await
}

async fn invoke_path(
    State(state): State<AppState>,
    Path((function_id, path)): Path<(String, String)>,
    req: Request<Body>,
) -> Response<Body> {
    invoke(state, function_id, path, req).await
}

async fn invoke(state: AppState, function_id: String, path: String, req: Request<Body>) -> Response<Body> {
    let id = match FunctionId::new(&function_id) {
        Ok(id) => id,
        Err(_) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "FunctionNotFound",
                format!("Function not found: {}", function_id),
            )
        }
    };

    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let request_id_value = HeaderValue::from_str(&request_id)
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));

    let method = req.method().clone();
    let query = req.uri().query().map(str::to_string);
    let mut headers = req.headers().clone();
    headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), request_id_value.clone());

    let body = match axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "InvalidBody", e.to_string());
        }
    };

    let mut invocation = Invocation::new(method, path)
        .with_headers(headers)
        .with_body(body.to_vec());
    if let Some(query) = query {
        invocation = invocation.with_query(query);
    }

    let started = Instant::now();
    let scale_ups_before = state.plane.scale().scale_ups(&id);
    let result = state.plane.invoke(&id, invocation).await;
    let elapsed = started.elapsed();
    if state.plane.scale().scale_ups(&id) > scale_ups_before {
        metrics::COLD_START_WAIT
            .with_label_values(&[id.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    let mut response = match result {
        Ok(upstream) => {
            metrics::record_invocation(&id, "success", elapsed);
            let mut builder = Response::builder().status(upstream.status);
            if let Some(headers) = builder.headers_mut() {
                // Repeated headers such as Set-Cookie keep every value.
                for (name, value) in &upstream.headers {
                    if *name == header::TRANSFER_ENCODING || *name == header::CONNECTION {
                        continue;
                    }
                    headers.append(name, value.clone());
                }
            }
            builder.body(Body::from(upstream.body)).unwrap_or_else(|e| {
                error_response(StatusCode::BAD_GATEWAY, "UpstreamError", e.to_string())
            })
        }
        Err(e) => {
            metrics::record_invocation(&id, e.kind(), elapsed);
            tracing::warn!(
                function_id = %id,
                request_id = %request_id,
                error_kind = e.kind(),
                error = %e,
                "Invocation failed"
            );
            error_response(invoke_error_status(&e), e.kind(), e.to_string())
        }
    };

    response
        .headers_mut()
        .insert(HeaderName::from_static(REQUEST_ID_HEADER), request_id_value);
    response
}

async fn status_all(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.plane.status().await)
}

async fn status_one(
    State(state): State<AppState>,
    Path(function_id): Path<String>,
) -> Response<Body> {
    let status = match FunctionId::new(&function_id) {
        Ok(id) => state.plane.function_status(&id).await,
        Err(_) => None,
    };
    match status {
        Some(status) => Json(status).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "FunctionNotFound",
            format!("Function not found: {}", function_id),
        ),
    }
}

async fn list_functions(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.plane.store();
    let specs: Vec<FunctionSpec> = store
        .ids()
        .iter()
        .filter_map(|id| store.spec(id).ok())
        .collect();
    Json(specs)
}

async fn put_function(
    State(state): State<AppState>,
    Path(function_id): Path<String>,
    Json(mut raw): Json<RawFunctionSpec>,
) -> Response<Body> {
    if raw.id.is_empty() {
        raw.id = function_id.clone();
    }
    if raw.id != function_id {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "InvalidSpec",
            format!("Body id '{}' does not match path id '{}'", raw.id, function_id),
        );
    }

    match FunctionSpec::from_raw(raw) {
        Ok(spec) => {
            let id = spec.id.clone();
            let generation = state.plane.apply(spec);
            Json(Applied { id, generation }).into_response()
        }
        Err(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, "InvalidSpec", e.to_string()),
    }
}

async fn delete_function(
    State(state): State<AppState>,
    Path(function_id): Path<String>,
) -> Response<Body> {
    let deleted = FunctionId::new(&function_id)
        .map(|id| state.plane.delete(&id))
        .unwrap_or(false);
    if deleted {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(
            StatusCode::NOT_FOUND,
            "FunctionNotFound",
            format!("Function not found: {}", function_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::response::AppendHeaders;
    use tower::ServiceExt;
    use zerowake_core::{ConfigLoader, InMemoryOrchestrator};

    const CONFIG: &str = r#"
gateway:
  scale_timeout_ms: 300
  poll_interval_ms: 20
functions:
  - id: hello
    code: "def main():\n    return 'hello'\n"
    runtime: python3.9
    minReplicas: 0
    maxReplicas: 1
"#;

    fn plane(backend: Arc<InMemoryOrchestrator>) -> Arc<ControlPlane> {
        let config = ConfigLoader::load_string(CONFIG).unwrap();
        let plane = ControlPlane::new(config.clone(), backend).unwrap();
        plane.seed(config.functions);
        Arc::new(plane)
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_status_mapping() {
        let id = FunctionId::new("hello").unwrap();
        assert_eq!(
            invoke_error_status(&InvokeError::FunctionNotFound(id.clone())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            invoke_error_status(&InvokeError::ScaleTimeout {
                function_id: id.clone(),
                waited_ms: 1
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            invoke_error_status(&InvokeError::ScaleError {
                function_id: id.clone(),
                reason: "denied".to_string()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            invoke_error_status(&InvokeError::UpstreamError {
                function_id: id,
                reason: "reset".to_string()
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_unknown_function_is_404_with_request_id() {
        let app = router(plane(Arc::new(InMemoryOrchestrator::default())));
        let req = Request::builder()
            .uri("/invoke/missing")
            .header(REQUEST_ID_HEADER, "abc-123")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-123");
        assert_eq!(body_json(response).await["error"], "FunctionNotFound");
    }

    #[tokio::test]
    async fn test_scale_timeout_is_504() {
        let backend = Arc::new(InMemoryOrchestrator::new(Duration::ZERO));
        backend.set_never_ready(true);
        let plane = plane(backend);
        plane
            .reconciler()
            .reconcile(&FunctionId::new("hello").unwrap())
            .await
            .unwrap();

        let req = Request::builder()
            .uri("/invoke/hello/greet?name=zw")
            .body(Body::empty())
            .unwrap();
        let response = router(plane).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(body_json(response).await["error"], "ScaleTimeout");
    }

    #[tokio::test]
    async fn test_invoke_forwards_to_workload() {
        let workload = Router::new().route(
            "/greet",
            get(|| async {
                (
                    StatusCode::CREATED,
                    AppendHeaders([(header::SET_COOKIE, "a=1"), (header::SET_COOKIE, "b=2")]),
                    "hi there",
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, workload).await.unwrap();
        });

        let backend = Arc::new(InMemoryOrchestrator::default());
        backend.set_endpoint_address("fn-hello-svc", format!("http://{}", addr));
        let plane = plane(backend.clone());
        plane
            .reconciler()
            .reconcile(&FunctionId::new("hello").unwrap())
            .await
            .unwrap();

        let req = Request::builder()
            .uri("/invoke/hello/greet")
            .body(Body::empty())
            .unwrap();
        let response = router(plane).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hi there");
        assert_eq!(backend.mutations("scale_workload"), 1);
    }

    #[tokio::test]
    async fn test_desired_state_api() {
        let plane = plane(Arc::new(InMemoryOrchestrator::default()));
        let app = router(plane.clone());

        let req = Request::builder()
            .method("PUT")
            .uri("/functions/greeter")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"id":"greeter","code":"x","runtime":"python3.9","minReplicas":0,"maxReplicas":2}"#,
            ))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["generation"], 1);

        let req = Request::builder()
            .method("PUT")
            .uri("/functions/broken")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"id":"broken","code":"x","runtime":"python3.9","minReplicas":3,"maxReplicas":1}"#,
            ))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let req = Request::builder()
            .uri("/functions")
            .body(Body::empty())
            .unwrap();
        let listed = body_json(app.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(listed.as_array().unwrap().len(), 2);

        let req = Request::builder()
            .method("DELETE")
            .uri("/functions/greeter")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!plane.store().contains(&FunctionId::new("greeter").unwrap()));

        let req = Request::builder()
            .method("DELETE")
            .uri("/functions/greeter")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_endpoints() {
        let app = router(plane(Arc::new(InMemoryOrchestrator::default())));

        let req = Request::builder().uri("/status").body(Body::empty()).unwrap();
        let report = body_json(app.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(report["functions"][0]["id"], "hello");
        assert_eq!(report["functions"][0]["phase"], "Pending");

        let req = Request::builder()
            .uri("/status/nope")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
