use crate::aggregate::{EnergyBreakdown, FleetAggregate, ManufacturerProfile, ManufacturerShare};
use crate::ingest::{ingest_bytes, IngestError, IngestReport, Ingested, SourceFormat};
use crate::metrics::{now_unix, Metrics};
use crate::query::DeviceQuery;
use crate::state::{LoadFailure, Pipeline, State as FleetState};
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<FleetState>>,
    pub pipeline: Arc<Pipeline>,
}

impl HttpAppState {
    /// Classifies a load result and swaps it in, or records the failure and keeps the old dataset.
    pub async fn apply_load(
        &self,
        source: &str,
        source_kind: &str,
        result: Result<Ingested, IngestError>,
    ) -> Result<IngestReport, IngestError> {
        let now = now_unix();
        let mut guard = self.state.write().await;
        match result {
            Ok(ingested) => {
                let snapshot = self.pipeline.build_snapshot(ingested, source, now);
                let report = snapshot.report.clone();
                info!(
                    source,
                    devices = snapshot.aggregate.total_devices,
                    skipped = report.rows_skipped,
                    coerced = report.coerced_cells,
                    "набор устройств загружен"
                );
                guard.replace_dataset(snapshot);
                self.metrics.inc_dataset_replacement();
                self.metrics.update_from_state(&guard);
                Ok(report)
            }
            Err(err) => {
                warn!(source, error = %err, "не удалось загрузить набор устройств, оставляю предыдущий");
                guard.record_failure(source, &err, now);
                self.metrics.inc_load_error(source_kind);
                Err(err)
            }
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiSummary {
    pub started_at_unix: i64,
    pub loaded_at_unix: i64,
    pub loaded_at: Option<String>,
    pub source: String,
    pub dataset_replacements: u64,
    pub aggregate: FleetAggregate,
    pub energy: EnergyBreakdown,
    pub report: IngestReport,
    pub last_failure: Option<LoadFailure>,
}

impl From<&FleetState> for ApiSummary {
    fn from(value: &FleetState) -> Self {
        let snapshot = value.snapshot();
        Self {
            started_at_unix: value.started_at_unix,
            loaded_at_unix: snapshot.loaded_at_unix,
            loaded_at: format_unix(snapshot.loaded_at_unix),
            source: snapshot.source.clone(),
            dataset_replacements: value.dataset_replacements,
            aggregate: snapshot.aggregate.clone(),
            energy: snapshot.energy.clone(),
            report: snapshot.report.clone(),
            last_failure: value.last_failure.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CompareParams {
    a: Option<String>,
    b: Option<String>,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    state: Arc<RwLock<FleetState>>,
    pipeline: Arc<Pipeline>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/devices", get(devices_handler))
        .route("/api/manufacturers", get(manufacturers_handler))
        .route("/api/compare", get(compare_handler))
        .route("/api/energy", get(energy_handler))
        .route("/api/dataset", post(dataset_handler))
        .with_state(HttpAppState {
            metrics,
            state,
            pipeline,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    {
        let guard = state.state.read().await;
        state.metrics.update_from_state(&guard);
    }
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

async fn summary_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(ApiSummary::from(&*guard))
}

async fn devices_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let snapshot = state.state.read().await.snapshot();
    match query.run(&snapshot.devices) {
        Ok(result) => Json(result).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn manufacturers_handler(State(state): State<HttpAppState>) -> Json<Vec<ManufacturerShare>> {
    let snapshot = state.state.read().await.snapshot();
    Json(snapshot.manufacturers())
}

async fn compare_handler(
    State(state): State<HttpAppState>,
    Query(params): Query<CompareParams>,
) -> Json<Vec<ManufacturerProfile>> {
    let snapshot = state.state.read().await.snapshot();
    let names: Vec<&str> = [params.a.as_deref(), params.b.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    Json(snapshot.compare(&names))
}

async fn energy_handler(State(state): State<HttpAppState>) -> Json<EnergyBreakdown> {
    let snapshot = state.state.read().await.snapshot();
    Json(snapshot.energy.clone())
}

async fn dataset_handler(
    State(state): State<HttpAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let format = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(SourceFormat::from_content_type)
        .unwrap_or(SourceFormat::Auto);
    let result = ingest_bytes(&body, format, &state.pipeline.columns);

    match state.apply_load("<upload>", "upload", result).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

fn format_unix(ts: i64) -> Option<String> {
    if ts <= 0 {
        return None;
    }
    let st = UNIX_EPOCH + Duration::from_secs(ts as u64);
    Some(humantime::format_rfc3339_seconds(st).to_string())
}
