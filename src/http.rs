use crate::metrics::Metrics;
use crate::orchestrator::{CycleState, Orchestrator, TriggerOutcome};
use crate::records::{RunStatistics, TableCounts};
use crate::store::{Store, StoreError};
use crate::time::format_unix;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub store: Arc<Store>,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiHealth {
    pub state: CycleState,
    pub counts: TableCounts,
    pub latest_run: Option<RunStatistics>,
    pub last_run_at: Option<String>,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    store: Arc<Store>,
    orchestrator: Arc<Orchestrator>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/health", get(health_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/hosts", get(hosts_handler))
        .route("/api/hosts/:name", get(host_by_name_handler))
        .route("/api/clusters", get(clusters_handler))
        .route("/api/vms", get(vms_handler))
        .route("/api/snapshots", get(snapshots_handler))
        .route("/api/endpoints", get(endpoints_handler))
        .route("/api/endpoints/:address", get(endpoint_handler))
        .route("/api/rules", get(rules_handler))
        .route("/api/runs/latest", get(latest_run_handler))
        .with_state(HttpAppState {
            metrics,
            store,
            orchestrator,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn health_handler(State(state): State<HttpAppState>) -> Response {
    let summary = match read_store(&state.store, Store::health_summary).await {
        Ok(summary) => summary,
        Err(response) => return response,
    };

    Json(ApiHealth {
        state: state.orchestrator.state(),
        counts: summary.counts,
        last_run_at: summary.latest_run.as_ref().map(|r| format_unix(r.last_run_unix)),
        latest_run: summary.latest_run,
    })
    .into_response()
}

async fn hosts_handler(State(state): State<HttpAppState>) -> Response {
    json_or_error(read_store(&state.store, Store::hosts).await)
}

async fn host_by_name_handler(
    State(state): State<HttpAppState>,
    Path(name): Path<String>,
) -> Response {
    match read_store(&state.store, move |store| store.host_by_name(&name)).await {
        Ok(hosts) if hosts.is_empty() => {
            (StatusCode::NOT_FOUND, "хост не найден").into_response()
        }
        other => json_or_error(other),
    }
}

async fn clusters_handler(State(state): State<HttpAppState>) -> Response {
    json_or_error(read_store(&state.store, Store::clusters).await)
}

async fn vms_handler(State(state): State<HttpAppState>) -> Response {
    json_or_error(read_store(&state.store, Store::virtual_machines).await)
}

async fn snapshots_handler(State(state): State<HttpAppState>) -> Response {
    json_or_error(read_store(&state.store, Store::snapshots).await)
}

async fn endpoints_handler(State(state): State<HttpAppState>) -> Response {
    json_or_error(read_store(&state.store, Store::endpoint_health).await)
}

async fn endpoint_handler(
    State(state): State<HttpAppState>,
    Path(address): Path<String>,
) -> Response {
    match read_store(&state.store, move |store| store.endpoint_health_for(&address)).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "конечная точка не найдена").into_response(),
        Err(response) => response,
    }
}

async fn rules_handler(State(state): State<HttpAppState>) -> Response {
    json_or_error(read_store(&state.store, Store::affinity_rules).await)
}

async fn latest_run_handler(State(state): State<HttpAppState>) -> Response {
    json_or_error(read_store(&state.store, Store::latest_run).await)
}

/// Runs a blocking store read off the async workers.
async fn read_store<T, F>(store: &Arc<Store>, read: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || read(&store)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            error!(error = %err, "store read failed");
            Err((StatusCode::SERVICE_UNAVAILABLE, format!("хранилище недоступно: {err}"))
                .into_response())
        }
        Err(err) => Err(
            (StatusCode::INTERNAL_SERVER_ERROR, format!("ошибка запроса: {err}")).into_response(),
        ),
    }
}

fn json_or_error<T: Serialize>(result: Result<T, Response>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(response) => response,
    }
}

async fn refresh_handler(State(state): State<HttpAppState>) -> Response {
    match state.orchestrator.trigger() {
        TriggerOutcome::Started => {
            (StatusCode::ACCEPTED, Json(json!({ "status": "started" }))).into_response()
        }
        TriggerOutcome::Busy => (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "busy",
                "state": state.orchestrator.state().as_str(),
            })),
        )
            .into_response(),
    }
}
