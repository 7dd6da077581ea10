#![cfg(feature = "web")]

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::NaiveDateTime;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::anomaly::{AnomalyReport, detect_anomalies};
use crate::billing::{EnergySummary, summarize, validate_rate};
use crate::config::{Config, validate_threshold};
use crate::dataset::{TIMESTAMP_COLUMN, TablePreview};
use crate::downloader::{self, CSV_FILENAME, XLSX_FILENAME};
use crate::error::{EnergyError, Result};
use crate::graph::{self, MeterSeries};
use crate::listener::{ListenerHandle, ListenerSettings, ListenerState};
use crate::live::{LiveRecorder, samples_to_dataset};
use crate::meter::{MeterColumns, MeterFrame, MeterWindow};
use crate::normalize::{NormalizeReport, Normalized, load_energy_data};
use crate::stats::{ColumnStats, HeadlineMetrics, compute_energy_stats, headline_metrics};
use crate::timestamp::parse_bound;

/// Rows shown in the upload preview
pub const UPLOAD_PREVIEW_ROWS: usize = 10;

/// Rows shown in the meter preview
pub const METER_PREVIEW_ROWS: usize = 20;

/// Live samples shown in the tail table
pub const LIVE_TAIL_ROWS: usize = 10;

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

struct Upload {
    filename: String,
    normalized: Arc<Normalized>,
}

/// Shared state behind every route
///
/// Each uploaded table replaces the previous one. The listener slot uses an
/// async mutex because stopping a listener awaits its task.
pub struct AppState {
    config: Config,
    upload: Mutex<Option<Upload>>,
    meter: Mutex<Option<MeterFrame>>,
    recorder: Arc<LiveRecorder>,
    listener: tokio::sync::Mutex<Option<ListenerHandle>>,
}

impl AppState {
    /// State backed by the live log file named in the configuration
    pub fn new(config: Config) -> Result<Self> {
        let recorder = LiveRecorder::with_log(&config.live_log, config.live_capacity)?;
        Ok(Self::with_recorder(config, Arc::new(recorder)))
    }

    pub fn with_recorder(config: Config, recorder: Arc<LiveRecorder>) -> Self {
        Self {
            config,
            upload: Mutex::new(None),
            meter: Mutex::new(None),
            recorder,
            listener: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run CPU-bound parsing, rendering or export work off the async workers
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EnergyError::Io(io::Error::other(e)))?
}

impl IntoResponse for EnergyError {
    fn into_response(self) -> Response {
        let status = match &self {
            EnergyError::Parse(_) | EnergyError::InvalidInput(_) | EnergyError::UnknownColumn(_) => {
                StatusCode::BAD_REQUEST
            }
            EnergyError::MissingColumns { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EnergyError::EmptyWindow { .. } | EnergyError::EmptyDataset => StatusCode::NOT_FOUND,
            EnergyError::ListenerAlreadyRunning | EnergyError::ListenerNotRunning => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("request failed: {}", self);
        } else {
            warn!("request rejected: {}", self);
        }

        let mut body = json!({
            "status": "error",
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let EnergyError::MissingColumns { found, .. } = &self {
            body["found"] = json!(found);
        }

        (status, Json(body)).into_response()
    }
}

/// CORS policy for the configured origins, if any
///
/// The dashboard is served from the same origin as the API, so without an
/// allowlist no CORS headers are sent and browsers block cross-site reads.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring unusable CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }

    info!("allowing cross-origin requests from {}", origins.join(", "));
    Some(
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

/// Build the router over the given state
pub fn router(state: Arc<AppState>) -> Router {
    let mut app: Router<Arc<AppState>> = Router::new()
        .route("/", get(serve_dashboard))
        .route("/api/config", get(get_config))
        .route("/api/upload", post(upload_csv))
        .route("/api/overview", get(get_overview))
        .route("/api/chart/compare", get(compare_chart))
        .route("/api/anomalies", get(get_anomalies))
        .route("/api/meter/upload", post(upload_meter))
        .route("/api/meter/summary", get(meter_summary))
        .route("/api/meter/chart/:series", get(meter_chart))
        .route("/api/meter/download", get(meter_download))
        .route("/api/live/start", post(start_listener))
        .route("/api/live/stop", post(stop_listener))
        .route("/api/live/status", get(live_status))
        .route("/api/live/chart", get(live_chart))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));
    if let Some(cors) = cors_layer(&state.config.cors_origins) {
        app = app.layer(cors);
    }
    app.with_state(state)
}

pub async fn run(config: Config) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let bind = config.bind.clone();
    let state = Arc::new(AppState::new(config)?);
    let app = router(state.clone());

    let listener = TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = state.listener.lock().await.take() {
        handle.stop().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(include_str!("./static/dashboard.html"))
}

#[derive(Serialize)]
struct ConfigResponse {
    rate: f64,
    threshold: f64,
    broker: String,
    topic: String,
    port: u16,
    refresh_secs: u64,
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    let c = &state.config;
    Json(ConfigResponse {
        rate: c.rate,
        threshold: c.z_threshold,
        broker: c.mqtt_broker.clone(),
        topic: c.mqtt_topic.clone(),
        port: c.mqtt_port,
        refresh_secs: c.refresh_secs,
    })
}

/// Read the `file` field of a multipart form
async fn read_file_field(mut multipart: Multipart) -> Result<(String, Bytes)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| EnergyError::InvalidInput(e.to_string()))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.csv").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| EnergyError::InvalidInput(e.to_string()))?;
            return Ok((filename, data));
        }
    }
    Err(EnergyError::InvalidInput("form has no 'file' field".to_string()))
}

#[derive(Serialize)]
struct OverviewResponse {
    status: &'static str,
    filename: String,
    rows: usize,
    columns: Vec<String>,
    numeric_columns: Vec<String>,
    has_timestamp: bool,
    report: NormalizeReport,
    preview: TablePreview,
    stats: Vec<ColumnStats>,
    headline: HeadlineMetrics,
}

fn overview(upload: &Upload) -> OverviewResponse {
    let dataset = &upload.normalized.dataset;
    let stats = compute_energy_stats(dataset);
    let headline = headline_metrics(&stats);
    OverviewResponse {
        status: "ok",
        filename: upload.filename.clone(),
        rows: dataset.len(),
        columns: dataset.column_names(),
        numeric_columns: dataset.numeric_column_names(),
        has_timestamp: dataset.timestamps(TIMESTAMP_COLUMN).is_some(),
        report: upload.normalized.report.clone(),
        preview: dataset.preview(UPLOAD_PREVIEW_ROWS),
        stats,
        headline,
    }
}

async fn upload_csv(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<OverviewResponse>> {
    let (filename, bytes) = read_file_field(multipart).await?;
    info!("upload '{}' ({} bytes)", filename, bytes.len());

    let normalized = blocking(move || load_energy_data(&bytes)).await?;
    let upload = Upload {
        filename,
        normalized: Arc::new(normalized),
    };
    let response = overview(&upload);
    *lock(&state.upload) = Some(upload);
    Ok(Json(response))
}

fn no_upload() -> EnergyError {
    EnergyError::InvalidInput("upload a CSV file first".to_string())
}

async fn get_overview(State(state): State<Arc<AppState>>) -> Result<Json<OverviewResponse>> {
    let guard = lock(&state.upload);
    let upload = guard.as_ref().ok_or_else(no_upload)?;
    Ok(Json(overview(upload)))
}

fn png(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], bytes).into_response()
}

#[derive(Deserialize)]
struct CompareQuery {
    /// Comma-separated column names
    columns: Option<String>,
}

async fn compare_chart(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CompareQuery>,
) -> Result<Response> {
    let requested: Vec<String> = params
        .columns
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    let normalized = lock(&state.upload)
        .as_ref()
        .map(|u| u.normalized.clone())
        .ok_or_else(no_upload)?;
    let resample_above = state.config.resample_above;
    let bytes = blocking(move || {
        graph::compare_chart(&normalized.dataset, &requested, resample_above)
    })
    .await?;
    Ok(png(bytes))
}

#[derive(Deserialize)]
struct AnomalyQuery {
    column: Option<String>,
    threshold: Option<f64>,
}

async fn get_anomalies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnomalyQuery>,
) -> Result<Json<AnomalyReport>> {
    let threshold = validate_threshold(params.threshold.unwrap_or(state.config.z_threshold))?;

    let guard = lock(&state.upload);
    let upload = guard.as_ref().ok_or_else(no_upload)?;
    let dataset = &upload.normalized.dataset;
    let numeric = dataset.numeric_column_names();

    let column = match params.column.filter(|c| !c.trim().is_empty()) {
        Some(column) if numeric.contains(&column) => column,
        Some(column) => return Err(EnergyError::UnknownColumn(column)),
        None => numeric
            .into_iter()
            .next()
            .ok_or_else(|| EnergyError::InvalidInput("no numeric column to analyse".to_string()))?,
    };

    let report = detect_anomalies(dataset, &column, threshold);
    info!(
        "{} anomalies in '{}' at |z| > {}",
        report.count(),
        column,
        threshold
    );
    Ok(Json(report))
}

#[derive(Serialize)]
struct MeterResponse {
    status: &'static str,
    rows: usize,
    columns: MeterColumns,
    range_start: Option<NaiveDateTime>,
    range_end: Option<NaiveDateTime>,
    preview: TablePreview,
}

fn meter_response(frame: &MeterFrame) -> MeterResponse {
    let range = frame.time_range();
    MeterResponse {
        status: "ok",
        rows: frame.dataset().len(),
        columns: frame.columns().clone(),
        range_start: range.map(|r| r.0),
        range_end: range.map(|r| r.1),
        preview: frame.dataset().preview(METER_PREVIEW_ROWS),
    }
}

async fn upload_meter(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<MeterResponse>> {
    let (filename, bytes) = read_file_field(multipart).await?;
    info!("meter upload '{}' ({} bytes)", filename, bytes.len());

    let labels = state.config.meter_labels.clone();
    let frame = blocking(move || MeterFrame::load(&bytes, &labels)).await?;
    let response = meter_response(&frame);
    *lock(&state.meter) = Some(frame);
    Ok(Json(response))
}

#[derive(Deserialize)]
struct WindowQuery {
    start: Option<String>,
    end: Option<String>,
    rate: Option<f64>,
    format: Option<String>,
}

fn meter_window(state: &AppState, params: &WindowQuery) -> Result<MeterWindow> {
    let start = parse_bound(params.start.as_deref())?;
    let end = parse_bound(params.end.as_deref())?;
    let guard = lock(&state.meter);
    let frame = guard
        .as_ref()
        .ok_or_else(|| EnergyError::InvalidInput("upload a meter export first".to_string()))?;
    frame.window(start, end)
}

#[derive(Serialize)]
struct SummaryResponse {
    status: &'static str,
    summary: EnergySummary,
    range_start: Option<NaiveDateTime>,
    range_end: Option<NaiveDateTime>,
    preview: TablePreview,
}

async fn meter_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<SummaryResponse>> {
    let rate = validate_rate(params.rate.unwrap_or(state.config.rate))?;
    let window = meter_window(&state, &params)?;
    let summary = summarize(&window, rate)?;

    let range = lock(&state.meter).as_ref().and_then(MeterFrame::time_range);
    Ok(Json(SummaryResponse {
        status: "ok",
        summary,
        range_start: range.map(|r| r.0),
        range_end: range.map(|r| r.1),
        preview: window.dataset.preview(METER_PREVIEW_ROWS),
    }))
}

async fn meter_chart(
    State(state): State<Arc<AppState>>,
    Path(series): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Response> {
    let which: MeterSeries = series.parse()?;
    let window = meter_window(&state, &params)?;
    let resample_above = state.config.resample_above;
    let bytes = blocking(move || graph::meter_chart(&window, which, resample_above)).await?;
    Ok(png(bytes))
}

async fn meter_download(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowQuery>,
) -> Result<Response> {
    let window = meter_window(&state, &params)?;
    let rows = window.len();
    let (content_type, filename, bytes) = match params.format.as_deref().unwrap_or("csv") {
        "csv" => (
            "text/csv; charset=utf-8",
            CSV_FILENAME,
            blocking(move || downloader::to_csv(&window.dataset)).await?,
        ),
        "xlsx" => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            XLSX_FILENAME,
            blocking(move || downloader::to_xlsx(&window.dataset)).await?,
        ),
        other => {
            return Err(EnergyError::InvalidInput(format!(
                "unknown download format '{}'",
                other
            )));
        }
    };

    info!("download {} ({} rows)", filename, rows);
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Body of a start request; omitted fields fall back to the configuration
#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    broker: Option<String>,
    topic: Option<String>,
    port: Option<u16>,
}

#[derive(Serialize)]
struct ListenerResponse {
    status: &'static str,
    settings: ListenerSettings,
    state: ListenerState,
}

async fn start_listener(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<ListenerResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let settings = ListenerSettings {
        broker: request.broker.unwrap_or_else(|| state.config.mqtt_broker.clone()),
        port: request.port.unwrap_or(state.config.mqtt_port),
        topic: request.topic.unwrap_or_else(|| state.config.mqtt_topic.clone()),
    };
    settings.validate()?;

    let mut slot = state.listener.lock().await;
    if slot.as_ref().is_some_and(ListenerHandle::is_running) {
        return Err(EnergyError::ListenerAlreadyRunning);
    }
    if let Some(finished) = slot.take() {
        let last = finished.stop().await;
        info!("replacing finished listener ({:?})", last);
    }

    let handle = ListenerHandle::start(settings, state.recorder.clone())?;
    let response = ListenerResponse {
        status: "ok",
        settings: handle.settings().clone(),
        state: handle.state(),
    };
    *slot = Some(handle);
    Ok(Json(response))
}

async fn stop_listener(State(state): State<Arc<AppState>>) -> Result<Json<ListenerResponse>> {
    let handle = state
        .listener
        .lock()
        .await
        .take()
        .ok_or(EnergyError::ListenerNotRunning)?;
    let settings = handle.settings().clone();
    let last = handle.stop().await;
    Ok(Json(ListenerResponse {
        status: "ok",
        settings,
        state: last,
    }))
}

#[derive(Serialize)]
struct LiveStatus {
    listener: Option<ListenerResponse>,
    received: u64,
    buffered: usize,
    refresh_secs: u64,
    tail: TablePreview,
}

async fn live_status(State(state): State<Arc<AppState>>) -> Json<LiveStatus> {
    let listener = state.listener.lock().await.as_ref().map(|h| ListenerResponse {
        status: "ok",
        settings: h.settings().clone(),
        state: h.state(),
    });
    let buffer = state.recorder.buffer();
    let tail = samples_to_dataset(&buffer.tail(LIVE_TAIL_ROWS)).preview(LIVE_TAIL_ROWS);

    Json(LiveStatus {
        listener,
        received: buffer.received(),
        buffered: buffer.len(),
        refresh_secs: state.config.refresh_secs,
        tail,
    })
}

async fn live_chart(State(state): State<Arc<AppState>>) -> Result<Response> {
    let points = state.recorder.numeric_points();
    match blocking(move || graph::live_chart(&points)).await? {
        Some(bytes) => Ok(png(bytes)),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "wattwatch-test-boundary";

    const ENERGY_CSV: &str = "\
Timestamp;Voltage;Current;Power
2024-03-01 10:00:00;230,1;4,2;966
2024-03-01 10:01:00;231,0;4,1;947
2024-03-01 10:02:00;229,5;4,3;987
2024-03-01 10:03:00;230,2;4,2;966
";

    const METER_CSV: &str = "\
TIME,Average Phase Voltage,3 Phase Active Power,Total-PF
2024-03-01 10:00:00,230,800,0.9
2024-03-01 11:00:00,232,1200,0.95
2024-03-01 12:00:00,228,1000,1.0
";

    fn app() -> (Router, Arc<AppState>) {
        app_with(Config::default())
    }

    fn app_with(config: Config) -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::with_recorder(
            config,
            Arc::new(LiveRecorder::in_memory(50)),
        ));
        (router(state.clone()), state)
    }

    fn multipart(uri: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"data.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n{content}\r\n--{b}--\r\n",
            b = BOUNDARY,
            content = content
        );
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_from(uri: &str, origin: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn dashboard_page_is_served() {
        let (app, _) = app();
        let response = app.oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upload_then_overview_and_anomalies() {
        let (app, _) = app();

        let response = app
            .clone()
            .oneshot(multipart("/api/upload", ENERGY_CSV))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["rows"], 4);
        assert_eq!(body["has_timestamp"], true);
        assert_eq!(body["report"]["delimiter"], ";");
        assert_eq!(body["stats"].as_array().unwrap().len(), 3);
        assert_eq!(body["preview"]["rows"].as_array().unwrap().len(), 4);

        let response = app.clone().oneshot(get("/api/overview")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get("/api/anomalies?column=Power&threshold=3"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["column"], "Power");
        assert_eq!(body["anomalies"].as_array().unwrap().len(), 0);

        let response = app
            .oneshot(get("/api/anomalies?column=Nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "unknown_column");
    }

    #[tokio::test]
    async fn overview_before_upload_is_rejected() {
        let (app, _) = app();
        let response = app.oneshot(get("/api/overview")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_threshold_is_rejected() {
        let (app, _) = app();
        app.clone()
            .oneshot(multipart("/api/upload", ENERGY_CSV))
            .await
            .unwrap();
        let response = app
            .oneshot(get("/api/anomalies?threshold=-2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn meter_missing_columns_lists_what_was_found() {
        let (app, _) = app();
        let response = app
            .oneshot(multipart("/api/meter/upload", "TIME,Voltage\n2024-03-01 10:00,230\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "missing_columns");
        assert_eq!(body["found"], json!(["TIME", "Voltage"]));
    }

    #[tokio::test]
    async fn meter_summary_and_download() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(multipart("/api/meter/upload", METER_CSV))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["rows"], 3);
        assert_eq!(body["range_start"], "2024-03-01T10:00:00");

        let response = app
            .clone()
            .oneshot(get("/api/meter/summary?rate=8"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let bill = body["summary"]["estimated_bill"].as_f64().unwrap();
        assert!((bill - 16.0).abs() < 1e-9);

        let response = app
            .clone()
            .oneshot(get(
                "/api/meter/summary?start=2025-01-01%2000:00&end=2025-01-02%2000:00",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["kind"], "empty_window");

        let response = app
            .clone()
            .oneshot(get("/api/meter/summary?rate=99"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(get("/api/meter/download?end=2024-03-01%2011:00:00"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains(CSV_FILENAME));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("TIME,Average Phase Voltage,3 Phase Active Power,Total-PF"));
    }

    #[tokio::test]
    async fn unknown_meter_series_is_rejected() {
        let (app, _) = app();
        let response = app.oneshot(get("/api/meter/chart/current")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn live_status_and_stop_without_listener() {
        let (app, state) = app();
        state.recorder.record(b"230.5").unwrap();
        state.recorder.record(b"offline").unwrap();

        let response = app.clone().oneshot(get("/api/live/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["received"], 2);
        assert!(body["listener"].is_null());
        assert_eq!(body["tail"]["rows"].as_array().unwrap().len(), 2);

        let response = app
            .clone()
            .oneshot(get("/api/live/chart"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let stop = Request::builder()
            .method("POST")
            .uri("/api/live/stop")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(stop).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn start_with_empty_topic_is_rejected() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json("/api/live/start", r#"{"broker":"localhost","topic":" "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn second_start_while_running_is_a_conflict() {
        // Accepts TCP but never answers CONNECT, so the listener stays connecting
        let silent_broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = silent_broker.local_addr().unwrap().port();
        let body = format!(
            r#"{{"broker":"127.0.0.1","port":{},"topic":"meter/test"}}"#,
            port
        );
        let (app, state) = app();

        let response = app
            .clone()
            .oneshot(post_json("/api/live/start", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let started = json_body(response).await;
        assert_eq!(started["settings"]["port"], port);
        assert_eq!(started["state"]["state"], "connecting");

        let response = app
            .clone()
            .oneshot(post_json("/api/live/start", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["kind"], "listener_running");

        let response = app
            .oneshot(post_json("/api/live/stop", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["state"]["state"], "stopped");
        assert!(state.listener.lock().await.is_none());
    }

    #[tokio::test]
    async fn cross_origin_reads_are_not_allowed_by_default() {
        let (app, _) = app();
        let response = app
            .oneshot(get_from("/api/live/status", "https://evil.example"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            !response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }

    #[tokio::test]
    async fn only_configured_origins_get_cors_headers() {
        let config = Config {
            cors_origins: vec!["http://localhost:5173".to_string()],
            ..Config::default()
        };
        let (app, _) = app_with(config);

        let response = app
            .clone()
            .oneshot(get_from("/api/live/status", "http://localhost:5173"))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );

        let response = app
            .oneshot(get_from("/api/live/status", "https://evil.example"))
            .await
            .unwrap();
        assert!(
            !response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }
}
