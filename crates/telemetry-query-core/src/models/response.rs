//! Response shapes returned by the telemetry backend

use std::collections::BTreeMap;
use std::num::NonZeroU64;

use serde::{Deserialize, Deserializer, Serialize};

use super::primitive::{PrimitiveValue, ValueType};

/// Envelope wrapping every backend response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Payload; absent or null when the backend had nothing to return
    #[serde(default)]
    pub result: Option<T>,
    /// `false` when the backend rejected the request
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

impl<T> ApiEnvelope<T> {
    /// Joined backend error messages
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return "backend reported failure without details".to_string();
        }
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Error or informational message in an envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

impl std::fmt::Display for ApiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A single log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub dataset: String,
    /// Epoch milliseconds
    pub timestamp: NonZeroU64,
    pub source: EventSource,
    #[serde(rename = "$workers", default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<WorkersEvent>,
    #[serde(rename = "$metadata")]
    pub metadata: EventMetadata,
}

/// Raw log line or structured source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventSource {
    Text(String),
    Structured(SourceDetails),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// Invocation details attached to an event
///
/// The full shape extends the mini shape with mandatory CPU and wall time
/// plus diagnostics. Parsing tries the full shape first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkersEvent {
    Full(FullWorkersEvent),
    Mini(MiniWorkersEvent),
}

impl WorkersEvent {
    /// Fields shared by both shapes
    pub fn base(&self) -> &WorkersEventBase {
        match self {
            Self::Full(e) => &e.base,
            Self::Mini(e) => &e.base,
        }
    }

    /// Request the event belongs to
    pub fn request_id(&self) -> &str {
        &self.base().request_id
    }

    /// Wall time, when the backend reported it
    pub fn wall_time_ms(&self) -> Option<f64> {
        match self {
            Self::Full(e) => Some(e.wall_time_ms),
            Self::Mini(e) => e.wall_time_ms,
        }
    }

    /// CPU time, when the backend reported it
    pub fn cpu_time_ms(&self) -> Option<f64> {
        match self {
            Self::Full(e) => Some(e.cpu_time_ms),
            Self::Mini(e) => e.cpu_time_ms,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Fields common to mini and full invocation events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkersEventBase {
    pub event: EventDetails,
    pub script_name: String,
    pub outcome: String,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_version: Option<ScriptVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_model: Option<ExecutionModel>,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiniWorkersEvent {
    #[serde(flatten)]
    pub base: WorkersEventBase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullWorkersEvent {
    #[serde(flatten)]
    pub base: WorkersEventBase,
    pub wall_time_ms: f64,
    pub cpu_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics_channel_events: Option<Vec<DiagnosticsChannelEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsChannelEvent {
    pub timestamp: f64,
    pub channel: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ray_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// What triggered an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Fetch,
    Scheduled,
    Alarm,
    Cron,
    Queue,
    Email,
    Tail,
    Rpc,
    Websocket,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionModel {
    DurableObject,
    Stateless,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Descriptive fields attached to every event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<NonZeroU64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<NonZeroU64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_duration: Option<NonZeroU64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_start: Option<NonZeroU64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<NonZeroU64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_template: Option<String>,
}

/// Events view payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<TelemetryEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<f64>,
}

/// A field present in the returned events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

// ---------------------------------------------------------------------------
// Calculations
// ---------------------------------------------------------------------------

/// One calculation's aggregates and time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationSeries {
    /// An empty alias from the backend is treated as no alias
    #[serde(
        default,
        deserialize_with = "empty_string_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub alias: Option<String>,
    pub calculation: String,
    pub aggregates: Vec<AggregateResult>,
    pub series: Vec<SeriesBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesBucket {
    pub time: String,
    pub data: Vec<AggregateResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<AggregateGroup>>,
    pub value: f64,
    pub count: f64,
    pub interval: f64,
    pub sample_interval: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateGroup {
    pub key: String,
    pub value: PrimitiveValue,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Cost of executing a query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub elapsed: f64,
    pub rows_read: f64,
    pub bytes_read: f64,
}

/// Run-query payload
///
/// Which of `calculations`, `events`, or `invocations` is populated depends
/// on the view of the request that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRunResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculations: Option<Vec<CalculationSeries>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare: Option<Vec<CalculationSeries>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<EventsResult>,
    /// Events keyed by request id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocations: Option<BTreeMap<String, Vec<TelemetryEvent>>>,
    pub statistics: Statistics,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A key seen in the telemetry data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEntry {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Epoch milliseconds
    pub last_seen_at: f64,
}

/// A value seen for a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: PrimitiveValue,
    pub dataset: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mini_workers() -> serde_json::Value {
        json!({
            "event": {"request": {"url": "https://example.com/", "method": "GET"}},
            "scriptName": "api-proxy",
            "outcome": "ok",
            "eventType": "fetch",
            "requestId": "req-1"
        })
    }

    fn event_with(workers: serde_json::Value) -> serde_json::Value {
        json!({
            "dataset": "cloudflare-workers",
            "timestamp": 1_700_000_000_000u64,
            "source": "GET /",
            "$workers": workers,
            "$metadata": {"id": "evt-1", "service": "api-proxy", "statusCode": 200}
        })
    }

    #[test]
    fn test_mini_event_parses_without_extended_fields() {
        let event: TelemetryEvent = serde_json::from_value(event_with(mini_workers())).unwrap();
        let workers = event.workers.unwrap();

        assert!(!workers.is_full());
        assert_eq!(workers.request_id(), "req-1");
        assert_eq!(workers.wall_time_ms(), None);
    }

    #[test]
    fn test_full_event_preferred_when_extension_present() {
        let mut workers = mini_workers();
        workers["wallTimeMs"] = json!(12.5);
        workers["cpuTimeMs"] = json!(3);
        workers["dispatchNamespace"] = json!("customers");

        let event: TelemetryEvent = serde_json::from_value(event_with(workers)).unwrap();
        let workers = event.workers.unwrap();

        assert!(workers.is_full());
        assert_eq!(workers.wall_time_ms(), Some(12.5));
        assert_eq!(workers.cpu_time_ms(), Some(3.0));
        assert_eq!(workers.base().script_name, "api-proxy");
    }

    #[test]
    fn test_partial_extension_falls_back_to_mini() {
        let mut workers = mini_workers();
        workers["wallTimeMs"] = json!(40);

        let event: TelemetryEvent = serde_json::from_value(event_with(workers)).unwrap();
        let workers = event.workers.unwrap();

        assert!(!workers.is_full());
        assert_eq!(workers.wall_time_ms(), Some(40.0));
    }

    #[test]
    fn test_zero_timestamp_rejected() {
        let mut event = event_with(mini_workers());
        event["timestamp"] = json!(0);
        assert!(serde_json::from_value::<TelemetryEvent>(event).is_err());
    }

    #[test]
    fn test_structured_source() {
        let mut event = event_with(mini_workers());
        event["source"] = json!({"exception": {"name": "TypeError", "message": "x is undefined"}});

        let event: TelemetryEvent = serde_json::from_value(event).unwrap();
        match event.source {
            EventSource::Structured(details) => {
                assert_eq!(details.exception.unwrap().name.as_deref(), Some("TypeError"));
            }
            EventSource::Text(_) => panic!("expected structured source"),
        }
    }

    #[test]
    fn test_empty_alias_becomes_none() {
        let series: CalculationSeries = serde_json::from_value(json!({
            "alias": "",
            "calculation": "count",
            "aggregates": [],
            "series": []
        }))
        .unwrap();
        assert_eq!(series.alias, None);
    }

    #[test]
    fn test_statistics_required() {
        let result = serde_json::from_value::<QueryRunResult>(json!({"calculations": []}));
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_without_result() {
        let envelope: ApiEnvelope<Vec<KeyEntry>> =
            serde_json::from_value(json!({"success": true, "errors": [], "messages": []})).unwrap();
        assert!(envelope.result.is_none());
    }
}
