use crate::api::responses::{
    AnalyzeSuccessResponse, AnnotationResponse, ApiErrorCode, CountSuccessResponse, ErrorResponse, EvictSuccessResponse, FrameRecordResponse,
    HealthStatus, HealthSuccessResponse, HistoryResetResponse, HistoryRowResponse,
    HistorySuccessResponse, StopSuccessResponse, StreamEndResponse, ZoneResponse,
    ZonesSuccessResponse,
};
use crate::error::AppError;
use crate::history::HistorySnapshot;
use crate::occupancy::{CountingMode, OccupancyState, aggregate};
use crate::state::AppState;
use crate::stream::replay::{ReplaySource, parse_frame};
use crate::stream::{FrameRecord, StreamController, StreamEvent, spawn_stream_thread};
use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const MISSING_SOURCE_MESSAGE: &str = "Query parameter `source` is required";
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const CSV_CONTENT_TYPE: &str = "text/csv";
const CSV_FILENAME: &str = "zone_counts.csv";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceQuery {
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub source: Option<String>,
    /// `false` when the tracker cannot provide stable identities.
    pub tracked: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    pub tracked: Option<bool>,
}

pub enum ApiResponse<T> {
    Success { status: StatusCode, body: T },
    Error { status: StatusCode, body: ErrorResponse },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

impl<T> ApiResponse<T> {
    fn ok(body: T) -> Self {
        ApiResponse::Success {
            status: StatusCode::OK,
            body,
        }
    }
}

pub async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    build_health_response(&state, SystemTime::now())
}

pub async fn get_zones(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    build_zones_response(&state)
}

pub async fn get_count(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourceQuery>,
) -> impl IntoResponse {
    build_count_response(&state, query.source.as_deref(), SystemTime::now())
}

pub async fn post_stop(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourceQuery>,
) -> impl IntoResponse {
    build_stop_response(&state, query.source.as_deref(), SystemTime::now())
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourceQuery>,
) -> impl IntoResponse {
    build_evict_response(&state, query.source.as_deref(), SystemTime::now())
}

pub async fn post_analyze(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyzeQuery>,
    body: String,
) -> impl IntoResponse {
    build_analyze_response(&state, &body, counting_mode(query.tracked), SystemTime::now())
}

pub async fn get_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    build_history_response(&state)
}

pub async fn delete_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    build_history_reset_response(&state, SystemTime::now())
}

pub async fn get_history_csv(State(state): State<Arc<AppState>>) -> Response {
    let csv = state
        .history()
        .snapshot()
        .map_err(|err| err.to_string())
        .and_then(|snapshot| {
            let zones: Vec<&str> = state.layout().zone_ids().collect();
            render_history_csv(&zones, &snapshot).map_err(|err| err.to_string())
        });

    match csv {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, CSV_CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{CSV_FILENAME}\""),
                ),
            ],
            body,
        )
            .into_response(),
        Err(message) => internal_error::<()>(&message).into_response(),
    }
}

pub async fn get_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Response {
    match start_stream(&state, query) {
        Ok(receiver) => {
            let lines = ReceiverStream::new(receiver)
                .map(|event| Ok::<_, Infallible>(render_stream_line(&event)));
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
                Body::from_stream(lines),
            )
                .into_response()
        }
        Err(response) => response.into_response(),
    }
}

/// Bind a controller for `query.source` and start it on its own thread.
fn start_stream(
    state: &AppState,
    query: StreamQuery,
) -> Result<mpsc::Receiver<StreamEvent>, ApiResponse<()>> {
    let Some(source) = query.source.filter(|source| !source.is_empty()) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            ApiErrorCode::InvalidSource,
            "No video uploaded or invalid path".to_string(),
            SystemTime::now(),
        ));
    };
    let mode = counting_mode(query.tracked);

    if !source_allowed(state.replay_root(), Path::new(&source)) {
        info!(source = %source, "Rejected stream source outside replay directory");
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            ApiErrorCode::InvalidSource,
            "No video uploaded or invalid path".to_string(),
            SystemTime::now(),
        ));
    }

    let replay = ReplaySource::open(&source).map_err(|err| {
        info!(source = %source, error = %err, "Rejected stream request");
        error_response(
            StatusCode::BAD_REQUEST,
            ApiErrorCode::InvalidSource,
            "No video uploaded or invalid path".to_string(),
            SystemTime::now(),
        )
    })?;

    let controller = StreamController::bind(
        state.registry(),
        &source,
        mode,
        Arc::clone(state.layout()),
        Box::new(replay),
    )
    .map_err(|err| match err {
        AppError::SessionBusy(_) => error_response(
            StatusCode::CONFLICT,
            ApiErrorCode::SessionBusy,
            format!("Source {source:?} is already streaming"),
            SystemTime::now(),
        ),
        other => internal_error(&other.to_string()),
    })?
    .with_history(Arc::clone(state.history()));

    let (sender, receiver) = mpsc::channel(state.stream_channel_capacity());
    // Detached: the thread reports its outcome through the channel.
    let _ = spawn_stream_thread(controller, sender);
    Ok(receiver)
}

/// With a replay root configured, `source` must resolve to a file inside it.
fn source_allowed(root: Option<&Path>, source: &Path) -> bool {
    let Some(root) = root else {
        return true;
    };
    match (std::fs::canonicalize(root), std::fs::canonicalize(source)) {
        (Ok(root), Ok(source)) => source.starts_with(root),
        _ => false,
    }
}

fn counting_mode(tracked: Option<bool>) -> CountingMode {
    match tracked {
        Some(false) => CountingMode::Untracked,
        _ => CountingMode::Tracked,
    }
}

fn render_stream_line(event: &StreamEvent) -> String {
    let value = match event {
        StreamEvent::Frame(record) => serde_json::to_value(frame_record_response(record)),
        StreamEvent::Finished { summary, error } => serde_json::to_value(StreamEndResponse {
            source: summary.source.clone(),
            state: summary.state,
            frames_processed: summary.frames_processed,
            error: error.clone(),
        }),
    };
    match value {
        Ok(value) => format!("{value}\n"),
        Err(err) => {
            error!(error = %err, "Failed to serialize stream line");
            String::new()
        }
    }
}

fn frame_record_response(record: &FrameRecord) -> FrameRecordResponse {
    FrameRecordResponse {
        source: record.source.clone(),
        frame_index: record.frame_index,
        zone_counts: record.metrics.per_zone_counts.clone(),
        cumulative_count: record.metrics.cumulative_count,
        alerts: record.metrics.alerts.iter().cloned().collect(),
        timestamp: format_timestamp_lossy(record.timestamp),
    }
}

/// Count one frame against a throwaway state; no session or history is
/// touched.
fn build_analyze_response(
    state: &AppState,
    body: &str,
    mode: CountingMode,
    now: SystemTime,
) -> ApiResponse<AnalyzeSuccessResponse> {
    let detections = match parse_frame(body, 1) {
        Ok(detections) => detections,
        Err(err) => {
            info!(error = %err, "Rejected analyze request");
            return error_response(
                StatusCode::BAD_REQUEST,
                ApiErrorCode::InvalidFrame,
                "Body must be a frame of the form {\"detections\":[...]}".to_string(),
                now,
            );
        }
    };

    let mut occupancy = OccupancyState::new();
    let update = aggregate(&mut occupancy, mode, state.layout(), &detections);
    let annotations = update
        .annotations
        .into_iter()
        .map(|annotation| AnnotationResponse {
            id: annotation.identity,
            bbox: [
                annotation.bbox.x1,
                annotation.bbox.y1,
                annotation.bbox.x2,
                annotation.bbox.y2,
            ],
            zone: annotation.zone,
            counted: annotation.counted,
        })
        .collect();

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::ok(AnalyzeSuccessResponse {
            zone_counts: update.metrics.per_zone_counts,
            unique_count: update.metrics.cumulative_count,
            alerts: update.metrics.alerts.into_iter().collect(),
            annotations,
            timestamp,
        }),
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn build_health_response(state: &AppState, now: SystemTime) -> ApiResponse<HealthSuccessResponse> {
    let registry = state.registry();
    let counts = registry
        .keys()
        .and_then(|keys| Ok((keys.len(), registry.live_count()?)));
    let (sessions, live_sessions) = match counts {
        Ok(counts) => counts,
        Err(err) => return internal_error(&err.to_string()),
    };

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::ok(HealthSuccessResponse {
            status: HealthStatus::Ok,
            sessions,
            live_sessions,
            timestamp,
        }),
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn build_zones_response(state: &AppState) -> ApiResponse<ZonesSuccessResponse> {
    let layout = state.layout();
    let mut zones: Vec<ZoneResponse> = layout
        .zones()
        .iter()
        .map(|zone| ZoneResponse {
            id: zone.id.clone(),
            rect: Some([zone.rect.x1, zone.rect.y1, zone.rect.x2, zone.rect.y2]),
            threshold: Some(zone.threshold),
            catch_all: false,
        })
        .collect();
    zones.push(ZoneResponse {
        id: layout.catch_all().to_string(),
        rect: None,
        threshold: layout.threshold(layout.catch_all()),
        catch_all: true,
    });

    ApiResponse::ok(ZonesSuccessResponse { zones })
}

fn build_count_response(
    state: &AppState,
    source: Option<&str>,
    now: SystemTime,
) -> ApiResponse<CountSuccessResponse> {
    let Some(source) = source.filter(|source| !source.is_empty()) else {
        return missing_source(now);
    };

    let session = match state.registry().get(source) {
        Ok(session) => session,
        Err(err) => return internal_error(&err.to_string()),
    };
    let (unique_count, mut zone_counts, live) = match session {
        Some(session) => match session.occupancy() {
            Ok(occupancy) => (
                occupancy.unique_count(),
                occupancy.zone_counts().clone(),
                session.is_live(),
            ),
            Err(err) => return internal_error(&err.to_string()),
        },
        None => (0, BTreeMap::new(), false),
    };
    for zone in state.layout().zone_ids() {
        zone_counts.entry(zone.to_string()).or_insert(0);
    }

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::ok(CountSuccessResponse {
            source: source.to_string(),
            unique_count,
            zone_counts,
            live,
            timestamp,
        }),
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn build_stop_response(
    state: &AppState,
    source: Option<&str>,
    now: SystemTime,
) -> ApiResponse<StopSuccessResponse> {
    let Some(source) = source.filter(|source| !source.is_empty()) else {
        return missing_source(now);
    };

    let registry = state.registry();
    let result = registry
        .stop(source)
        .and_then(|stopped| Ok((stopped, registry.unique_count(source)?)));
    let (stopped, unique_count) = match result {
        Ok(result) => result,
        Err(err) => return internal_error(&err.to_string()),
    };

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::ok(StopSuccessResponse {
            source: source.to_string(),
            stopped,
            unique_count,
            timestamp,
        }),
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn build_evict_response(
    state: &AppState,
    source: Option<&str>,
    now: SystemTime,
) -> ApiResponse<EvictSuccessResponse> {
    let Some(source) = source.filter(|source| !source.is_empty()) else {
        return missing_source(now);
    };

    let evicted = match state.registry().evict(source) {
        Ok(evicted) => evicted,
        Err(AppError::SessionBusy(_)) => {
            return error_response(
                StatusCode::CONFLICT,
                ApiErrorCode::SessionBusy,
                format!("Source {source:?} is streaming; stop it before evicting"),
                now,
            );
        }
        Err(err) => return internal_error(&err.to_string()),
    };

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::ok(EvictSuccessResponse {
            source: source.to_string(),
            evicted,
            timestamp,
        }),
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn build_history_response(state: &AppState) -> ApiResponse<HistorySuccessResponse> {
    let snapshot = match state.history().snapshot() {
        Ok(snapshot) => snapshot,
        Err(err) => return internal_error(&err.to_string()),
    };

    let mut history = Vec::with_capacity(snapshot.history.len());
    for point in snapshot.history {
        let timestamp = match format_timestamp(point.timestamp) {
            Ok(timestamp) => timestamp,
            Err(_) => return internal_error("timestamp formatting failure"),
        };
        history.push(HistoryRowResponse {
            timestamp,
            zone_counts: point.per_zone_counts,
        });
    }
    let recent_points = snapshot
        .recent_points
        .into_iter()
        .map(|(zone, points)| {
            let points = points.into_iter().map(|point| [point.x, point.y]).collect();
            (zone, points)
        })
        .collect();

    ApiResponse::ok(HistorySuccessResponse {
        history,
        recent_points,
    })
}

fn build_history_reset_response(
    state: &AppState,
    now: SystemTime,
) -> ApiResponse<HistoryResetResponse> {
    let history = state.history();
    let result = history.len().and_then(|rows| {
        history.reset()?;
        Ok(rows)
    });
    let cleared_rows = match result {
        Ok(rows) => rows,
        Err(err) => return internal_error(&err.to_string()),
    };
    info!(rows = cleared_rows, "Chart history reset");

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::ok(HistoryResetResponse {
            cleared_rows,
            timestamp,
        }),
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

/// `timestamp,<zone...>` header, then one row per history point.
fn render_history_csv(zones: &[&str], snapshot: &HistorySnapshot) -> Result<String, TimestampError> {
    let mut out = String::from("timestamp");
    for zone in zones {
        out.push(',');
        out.push_str(&csv_field(zone));
    }
    out.push('\n');

    for point in &snapshot.history {
        out.push_str(&format_timestamp(point.timestamp)?);
        for zone in zones {
            let count = point.per_zone_counts.get(*zone).copied().unwrap_or(0);
            out.push(',');
            out.push_str(&count.to_string());
        }
        out.push('\n');
    }
    Ok(out)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn missing_source<T>(now: SystemTime) -> ApiResponse<T> {
    error_response(
        StatusCode::BAD_REQUEST,
        ApiErrorCode::MissingSource,
        MISSING_SOURCE_MESSAGE.to_string(),
        now,
    )
}

fn error_response<T>(
    status: StatusCode,
    error_code: ApiErrorCode,
    error_message: String,
    now: SystemTime,
) -> ApiResponse<T> {
    ApiResponse::Error {
        status,
        body: ErrorResponse {
            error_code,
            error_message,
            timestamp: format_timestamp_lossy(now),
        },
    }
}

fn internal_error<T>(message: &str) -> ApiResponse<T> {
    error!(message = message, "Internal error while handling request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ApiErrorCode::InternalError,
        INTERNAL_ERROR_MESSAGE.to_string(),
        SystemTime::now(),
    )
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

fn format_timestamp_lossy(timestamp: SystemTime) -> String {
    format_timestamp(timestamp).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format timestamp");
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    })
}
