use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::Notifier;
use crate::data::{EventState, Sample, Severity, ThresholdConfig, WarningEvent};
use crate::detector::{CheckResult, DetectorError, RealTimeDetector, ThresholdRegistry};
use crate::journal::{EventJournal, JournalError, TransitionQueue};
use crate::query::{QueryError, QueryService, Stats};
use crate::storage::{EventStore, HistoryFilter, DEFAULT_QUERY_LIMIT};

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<ThresholdRegistry>,
    pub detector: Arc<RealTimeDetector>,
    pub journal: Arc<EventJournal>,
    pub query: QueryService,
}

impl AppState {
    /// Wire the detector, journal and query service around one queue
    pub fn new(
        registry: Arc<ThresholdRegistry>,
        store: Arc<dyn EventStore>,
        notifier: Notifier,
        queue_capacity: usize,
        drain_interval: Duration,
    ) -> Self {
        let queue = Arc::new(TransitionQueue::new(queue_capacity));
        let stats = Arc::new(crate::stats::StatsAggregator::new());
        let detector = Arc::new(RealTimeDetector::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&stats),
        ));
        match store.watermarks() {
            Ok(marks) => detector.seed_watermarks(marks),
            Err(e) => tracing::warn!(error = %e, "Could not read episode history, starting without watermarks"),
        }
        let journal = Arc::new(EventJournal::new(
            Arc::clone(&queue),
            store,
            Arc::clone(&detector),
            Arc::clone(&stats),
            notifier,
            drain_interval,
        ));
        let query = QueryService::new(
            Arc::clone(&detector),
            Arc::clone(&journal),
            queue,
            stats,
        );

        Self {
            registry,
            detector,
            journal,
            query,
        }
    }
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub signals: usize,
    pub active_warnings: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        signals: state.registry.len(),
        active_warnings: state.detector.active_count(),
    })
}

// ============================================================================
// Checks
// ============================================================================

#[derive(Deserialize)]
pub struct CheckParams {
    pub signal_id: String,
    pub value: f64,
    pub timestamp: Option<String>,
}

pub async fn check(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CheckParams>,
) -> Result<Json<CheckResult>, ApiError> {
    let timestamp = match params.timestamp.as_deref() {
        Some(raw) => parse_time(raw).map_err(ApiError::BadRequest)?,
        None => Utc::now(),
    };

    let result = state
        .detector
        .check(&params.signal_id, params.value, timestamp)?;
    Ok(Json(result))
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub checked: usize,
    pub rejected: usize,
    pub transitions: usize,
}

pub async fn ingest_samples(
    State(state): State<Arc<AppState>>,
    Json(samples): Json<Vec<Sample>>,
) -> Json<IngestResponse> {
    let mut response = IngestResponse {
        checked: 0,
        rejected: 0,
        transitions: 0,
    };

    for sample in &samples {
        match state.detector.check_sample(sample) {
            Ok(result) => {
                response.checked += 1;
                if result.transition.is_some() {
                    response.transitions += 1;
                }
            }
            Err(e) => {
                response.rejected += 1;
                tracing::debug!(error = %e, "Sample rejected");
            }
        }
    }

    Json(response)
}

// ============================================================================
// Warnings
// ============================================================================

pub async fn list_active(State(state): State<Arc<AppState>>) -> Json<Vec<WarningEvent>> {
    Json(state.query.list_active())
}

#[derive(Deserialize)]
pub struct HistoricalParams {
    pub severity: Option<String>,
    pub signal_id: Option<String>,
    pub state: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub limit: Option<usize>,
}

impl HistoricalParams {
    fn into_filter(self) -> Result<HistoryFilter, ApiError> {
        let severity = self
            .severity
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<Severity>())
            .transpose()
            .map_err(ApiError::BadRequest)?;
        let state = self
            .state
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<EventState>())
            .transpose()
            .map_err(ApiError::BadRequest)?;
        let start_time = parse_optional_time(self.start_time)?;
        let end_time = parse_optional_time(self.end_time)?;

        Ok(HistoryFilter {
            severity,
            signal_id: self.signal_id.filter(|s| !s.is_empty()),
            state,
            start_time,
            end_time,
            limit: self.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
        })
    }
}

pub async fn list_historical(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoricalParams>,
) -> Result<Json<Vec<WarningEvent>>, ApiError> {
    let filter = params.into_filter()?;
    let events = state.query.query_historical(&filter)?;
    Ok(Json(events))
}

pub async fn warning_stats(State(state): State<Arc<AppState>>) -> Json<Stats> {
    Json(state.query.get_stats())
}

#[derive(Deserialize)]
pub struct AcknowledgeParams {
    pub user: Option<String>,
}

pub async fn acknowledge(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    Query(params): Query<AcknowledgeParams>,
) -> Result<Json<WarningEvent>, ApiError> {
    let user = params
        .user
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "system".to_string());

    let event = state.journal.acknowledge(&event_id, &user, Utc::now())?;
    Ok(Json(event))
}

// ============================================================================
// Thresholds
// ============================================================================

pub async fn list_thresholds(State(state): State<Arc<AppState>>) -> Json<Vec<ThresholdConfig>> {
    Json(state.registry.list())
}

#[derive(Serialize)]
pub struct ReplaceThresholdsResponse {
    pub signals: usize,
}

pub async fn replace_thresholds(
    State(state): State<Arc<AppState>>,
    Json(configs): Json<Vec<ThresholdConfig>>,
) -> Result<Json<ReplaceThresholdsResponse>, ApiError> {
    let signals = state
        .registry
        .replace_all(configs)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.detector.reset_unknown_signals();

    Ok(Json(ReplaceThresholdsResponse { signals }))
}

// ============================================================================
// Time Parsing
// ============================================================================

/// Accepts RFC3339, or epoch seconds / milliseconds (values of 1e11 and
/// above are taken as milliseconds).
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }

    let epoch: f64 = raw
        .parse()
        .map_err(|_| format!("invalid timestamp '{}'", raw))?;
    if !epoch.is_finite() {
        return Err(format!("invalid timestamp '{}'", raw));
    }
    let millis = if epoch.abs() >= 1e11 {
        epoch
    } else {
        epoch * 1000.0
    };

    Utc.timestamp_millis_opt(millis.round() as i64)
        .single()
        .ok_or_else(|| format!("timestamp out of range '{}'", raw))
}

fn parse_optional_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| parse_time(&s))
        .transpose()
        .map_err(ApiError::BadRequest)
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<DetectorError> for ApiError {
    fn from(e: DetectorError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<JournalError> for ApiError {
    fn from(e: JournalError) -> Self {
        match e {
            JournalError::EventNotFound(_) => ApiError::NotFound(e.to_string()),
            JournalError::Store(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidRange { .. } => ApiError::BadRequest(e.to_string()),
            QueryError::Store(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_formats() {
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(parse_time("1700000000").unwrap(), expected);
        assert_eq!(parse_time("1700000000000").unwrap(), expected);
        assert_eq!(parse_time("2023-11-14T22:13:20Z").unwrap(), expected);
        assert_eq!(
            parse_time("1700000000.5").unwrap(),
            expected + chrono::Duration::milliseconds(500)
        );
        assert!(parse_time("yesterday").is_err());
        assert!(parse_time("NaN").is_err());
    }

    #[test]
    fn test_historical_params_validation() {
        let params = HistoricalParams {
            severity: Some("critical".to_string()),
            signal_id: Some(String::new()),
            state: Some("recovered".to_string()),
            start_time: None,
            end_time: Some("1700000000".to_string()),
            limit: None,
        };
        let filter = params.into_filter().unwrap();
        assert_eq!(filter.severity, Some(Severity::Critical));
        assert_eq!(filter.state, Some(EventState::Recovered));
        assert!(filter.signal_id.is_none());
        assert_eq!(filter.limit, DEFAULT_QUERY_LIMIT);

        let bad = HistoricalParams {
            severity: Some("loud".to_string()),
            signal_id: None,
            state: None,
            start_time: None,
            end_time: None,
            limit: None,
        };
        assert!(matches!(bad.into_filter(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_startup_restores_episode_watermarks() {
        use crate::detector::Outcome;
        use crate::storage::MemoryEventStore;

        let config = ThresholdConfig::new("PPA:2", "frequency")
            .with_warning(Some(59.85), Some(60.15))
            .with_critical(Some(59.5), Some(60.5));
        let registry = Arc::new(ThresholdRegistry::with_configs(vec![config]).unwrap());
        let at = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();

        // History from a previous run: one episode over t=0..4
        let earlier = AppState::new(
            Arc::clone(&registry),
            Arc::new(MemoryEventStore::new()),
            Notifier::disabled(),
            64,
            Duration::from_secs(1),
        );
        for (s, v) in [(0, 60.2), (1, 60.2), (2, 60.2), (3, 60.0), (4, 60.0)] {
            earlier.detector.check("PPA:2", v, at(s)).unwrap();
        }
        earlier.journal.flush().unwrap();
        let store = Arc::clone(earlier.journal.store());

        let state = AppState::new(registry, store, Notifier::disabled(), 64, Duration::from_secs(1));
        let r = state.detector.check("PPA:2", 60.2, at(0)).unwrap();
        assert_eq!(r.outcome, Outcome::Late);
        assert_eq!(state.detector.active_count(), 0);
    }
}
