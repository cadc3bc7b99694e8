use crate::stream::StreamState;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    MissingSource,
    InvalidSource,
    InvalidFrame,
    SessionBusy,
    InternalError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ApiErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub sessions: usize,
    pub live_sessions: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ZoneResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rect: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    pub catch_all: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ZonesSuccessResponse {
    pub zones: Vec<ZoneResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CountSuccessResponse {
    pub source: String,
    pub unique_count: usize,
    pub zone_counts: BTreeMap<String, usize>,
    pub live: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StopSuccessResponse {
    pub source: String,
    pub stopped: bool,
    pub unique_count: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EvictSuccessResponse {
    pub source: String,
    pub evicted: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HistoryRowResponse {
    pub timestamp: String,
    pub zone_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HistorySuccessResponse {
    pub history: Vec<HistoryRowResponse>,
    pub recent_points: BTreeMap<String, Vec<[f64; 2]>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HistoryResetResponse {
    pub cleared_rows: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AnnotationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "box")]
    pub bbox: [f64; 4],
    pub zone: String,
    pub counted: bool,
}

/// Result of counting a single frame outside any session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalyzeSuccessResponse {
    pub zone_counts: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_count: Option<usize>,
    pub alerts: Vec<String>,
    pub annotations: Vec<AnnotationResponse>,
    pub timestamp: String,
}

/// One line of the NDJSON stream body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FrameRecordResponse {
    pub source: String,
    pub frame_index: u64,
    pub zone_counts: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative_count: Option<usize>,
    pub alerts: Vec<String>,
    pub timestamp: String,
}

/// Final NDJSON line once the controller reaches a terminal state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamEndResponse {
    pub source: String,
    pub state: StreamState,
    pub frames_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
