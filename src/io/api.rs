//! HTTP control API
//!
//! Routes:
//! - `GET /fences` - all fences keyed by name with `within`/`dwell`/`bbox`
//! - `POST /fences` - add `{"name": .., "bbox": {min_latitude, ..}}`
//! - `DELETE /fences/<name>` - remove a fence
//! - `GET /dwell_transition` / `PUT /dwell_transition` - dwell threshold in seconds
//! - `GET /metrics` - Prometheus text
//! - `GET /health`

use crate::domain::error::GeofenceError;
use crate::domain::geometry::{BoundingBox, RawBoundingBox};
use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::dispatcher::EventDispatcher;
use crate::services::registry::FenceRegistry;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared handles used by request handlers
pub struct ApiState {
    pub registry: Arc<FenceRegistry>,
    pub dispatcher: Arc<EventDispatcher>,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
}

#[derive(Debug, Deserialize)]
struct AddFenceRequest {
    name: Option<String>,
    bbox: Option<RawBoundingBox>,
}

#[derive(Debug, Deserialize)]
struct DwellRequest {
    seconds: i64,
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, json!({ "ok": false, "error": message }))
}

fn geofence_error_response(err: &GeofenceError) -> Response<Full<Bytes>> {
    let status = match err {
        GeofenceError::DuplicateName(_) => StatusCode::CONFLICT,
        GeofenceError::InvalidGeometry(_) => StatusCode::BAD_REQUEST,
        GeofenceError::NotFound(_) => StatusCode::NOT_FOUND,
    };
    error_response(status, &err.to_string())
}

fn list_fences(state: &ApiState) -> Response<Full<Bytes>> {
    let mut fences = Map::new();
    for fence in state.registry.list() {
        fences.insert(
            fence.name,
            json!({
                "within": fence.inside,
                "dwell": fence.dwelling,
                "bbox": fence.bbox,
            }),
        );
    }
    json_response(StatusCode::OK, Value::Object(fences))
}

fn add_fence(state: &ApiState, body: &[u8]) -> Response<Full<Bytes>> {
    let request: AddFenceRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "add_fence_bad_body");
            return error_response(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };

    let Some(name) = request.name.filter(|n| !n.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid name parameter");
    };
    let Some(raw) = request.bbox else {
        return error_response(StatusCode::BAD_REQUEST, "no bbox parameter found");
    };

    let result = BoundingBox::try_from(raw).and_then(|bbox| state.registry.add(&name, bbox));
    match result {
        Ok(()) => json_response(StatusCode::OK, json!({ "ok": true })),
        Err(e) => {
            info!(name = %name, error = %e, "add_fence_failed");
            geofence_error_response(&e)
        }
    }
}

fn remove_fence(state: &ApiState, segment: &str) -> Response<Full<Bytes>> {
    let Ok(name) = percent_decode_str(segment).decode_utf8() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid name parameter");
    };
    if name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid name parameter");
    }
    match state.registry.remove(&name) {
        Ok(()) => json_response(StatusCode::OK, json!({ "ok": true, "info": "removed fence" })),
        Err(e) => geofence_error_response(&e),
    }
}

fn get_dwell(state: &ApiState) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, json!({ "seconds": state.registry.dwell_threshold().as_secs() }))
}

fn set_dwell(state: &ApiState, body: &[u8]) -> Response<Full<Bytes>> {
    let seconds = match serde_json::from_slice::<DwellRequest>(body) {
        Ok(DwellRequest { seconds }) if seconds >= 0 => seconds as u64,
        _ => return error_response(StatusCode::BAD_REQUEST, "invalid input"),
    };
    state.registry.set_dwell_threshold(Duration::from_secs(seconds));
    json_response(StatusCode::OK, json!({ "seconds": seconds }))
}

/// Route a request with an already-collected body
pub fn route(state: &ApiState, method: &Method, path: &str, body: &[u8]) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/fences") => list_fences(state),
        (&Method::POST, "/fences") => add_fence(state, body),
        (&Method::DELETE, p) if p.starts_with("/fences/") => {
            remove_fence(state, &p["/fences/".len()..])
        }
        (&Method::GET, "/dwell_transition") => get_dwell(state),
        (&Method::PUT, "/dwell_transition") => set_dwell(state, body),
        (&Method::GET, "/metrics") => {
            let summary =
                state.metrics.snapshot(state.registry.len(), state.dispatcher.subscriber_count());
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(format_prometheus_metrics(&summary, &state.site_id))))
                .expect("static response should not fail")
        }
        (&Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail"),
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "api_body_read_failed");
            return Ok(error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"));
        }
    };

    Ok(route(&state, &parts.method, parts.uri.path(), &body))
}

/// Start the HTTP control API server
pub async fn start_api_server(
    port: u16,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %state.site_id, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
