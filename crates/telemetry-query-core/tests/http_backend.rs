//! End-to-end tests of the executor and tool boundary over HTTP

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use telemetry_query::config::ApiConfig;
use telemetry_query::executor::QueryExecutor;
use telemetry_query::models::{
    KeysRequest, QueryCalculation, QueryFilter, QueryOperator, QueryRunRequest, Timeframe,
    ValueType, ValuesRequest, View,
};
use telemetry_query::tools::{ObservabilityTools, KEYS_TOOL, QUERY_TOOL};
use telemetry_query::{AccountContext, Error};

const TELEMETRY: &str = "/client/v4/accounts/abc123/workers/observability/telemetry";

fn account() -> AccountContext {
    AccountContext::new("abc123", "test-token")
}

fn executor(server: &MockServer) -> QueryExecutor {
    QueryExecutor::from_config(&ApiConfig {
        base_url: format!("{}/client/v4", server.uri()),
        timeout_secs: 5,
        ..ApiConfig::default()
    })
    .unwrap()
}

fn statistics() -> Value {
    json!({"elapsed": 0.042, "rows_read": 1200, "bytes_read": 65536})
}

fn event(request_id: &str, wall_time: Option<f64>) -> Value {
    let mut workers = json!({
        "event": {"request": {"url": "https://api.example.com/users", "method": "GET"}, "response": {"status": 500}},
        "scriptName": "api-proxy",
        "outcome": "exception",
        "eventType": "fetch",
        "requestId": request_id
    });
    if let Some(wall) = wall_time {
        workers["wallTimeMs"] = json!(wall);
        workers["cpuTimeMs"] = json!(1.5);
    }
    json!({
        "dataset": "cloudflare-workers",
        "timestamp": 1_700_000_000_123u64,
        "source": {"exception": {"name": "Error", "message": "upstream failed"}},
        "$workers": workers,
        "$metadata": {
            "id": format!("evt-{request_id}"),
            "requestId": request_id,
            "service": "api-proxy",
            "level": "error",
            "error": "upstream failed",
            "statusCode": 500
        }
    })
}

#[tokio::test]
async fn run_query_events_view() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/query")))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "queryId": "q1",
            "view": "events",
            "limit": 10,
            "dry": false,
            "parameters": {"filters": [{"key": "$metadata.service", "operation": "eq", "value": "api-proxy", "type": "string"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "errors": [],
            "messages": [],
            "result": {
                "events": {
                    "events": [event("req-1", None), event("req-2", Some(88.0))],
                    "fields": [{"key": "$metadata.service", "type": "string"}],
                    "count": 2
                },
                "statistics": statistics()
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = QueryRunRequest::new("q1", Timeframe::new(1000, 2000))
        .view(View::Events)
        .limit(10)
        .filter(QueryFilter::eq("$metadata.service", "api-proxy"));

    let result = executor(&server)
        .run_query(&account(), &request)
        .await
        .unwrap()
        .expect("result present");

    let events = result.events.unwrap().events.unwrap();
    assert_eq!(events.len(), 2);
    assert!(!events[0].workers.as_ref().unwrap().is_full());
    assert!(events[1].workers.as_ref().unwrap().is_full());
    assert_eq!(events[1].workers.as_ref().unwrap().wall_time_ms(), Some(88.0));
    assert_eq!(events[0].metadata.service.as_deref(), Some("api-proxy"));
    assert_eq!(result.statistics.rows_read, 1200.0);
}

#[tokio::test]
async fn run_query_calculations_grouped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/query")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": {
                "calculations": [{
                    "alias": "",
                    "calculation": "p99($workers.wallTimeMs)",
                    "aggregates": [{
                        "groups": [{"key": "$metadata.service", "value": "api-proxy"}],
                        "value": 412.5, "count": 930, "interval": 60, "sampleInterval": 1
                    }],
                    "series": [{
                        "time": "2024-01-01T00:00:00Z",
                        "data": [{"value": 401.0, "count": 12, "interval": 60, "sampleInterval": 1}]
                    }]
                }],
                "statistics": statistics()
            }
        })))
        .mount(&server)
        .await;

    let request = QueryRunRequest::new("q2", Timeframe::new(0, 60_000))
        .calculation(QueryCalculation::of(QueryOperator::P99, "$workers.wallTimeMs"));

    let result = executor(&server)
        .run_query(&account(), &request)
        .await
        .unwrap()
        .unwrap();

    let calcs = result.calculations.unwrap();
    assert_eq!(calcs[0].alias, None);
    assert_eq!(calcs[0].aggregates[0].value, 412.5);
    assert_eq!(calcs[0].series.len(), 1);
}

#[tokio::test]
async fn run_query_rejects_foreign_view_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/query")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": {"invocations": {"req-1": [event("req-1", None)]}, "statistics": statistics()}
        })))
        .mount(&server)
        .await;

    let request = QueryRunRequest::new("q3", Timeframe::new(0, 1)).view(View::Events);
    let err = executor(&server)
        .run_query(&account(), &request)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MalformedResponse(_)));
}

#[tokio::test]
async fn server_error_is_transmission_error_with_query() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/query")))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let request = QueryRunRequest::new("q4", Timeframe::new(0, 1));
    let err = executor(&server)
        .run_query(&account(), &request)
        .await
        .unwrap_err();

    match err {
        Error::Transmission {
            message,
            status,
            query,
            ..
        } => {
            assert_eq!(status, Some(503));
            assert!(message.contains("upstream unavailable"));
            assert_eq!(query["queryId"], "q4");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn auth_rejection_is_transmission_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/keys")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "success": false,
            "errors": [{"code": 10000, "message": "Authentication error"}],
            "result": null
        })))
        .mount(&server)
        .await;

    let err = executor(&server)
        .list_keys(&account(), &KeysRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transmission { status: Some(403), .. }));
}

#[tokio::test]
async fn non_json_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/values")))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let request = ValuesRequest::new(Timeframe::new(0, 1), "$metadata.level", ValueType::String);
    let err = executor(&server)
        .list_values(&account(), &request)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedResponse(_)));
}

#[tokio::test]
async fn keys_large_limit_empty_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/keys")))
        .and(body_partial_json(json!({"limit": 2000, "filters": [], "datasets": []})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "result": []})))
        .expect(1)
        .mount(&server)
        .await;

    let request = KeysRequest {
        limit: Some(2000),
        ..KeysRequest::default()
    };
    let keys = executor(&server).list_keys(&account(), &request).await.unwrap();
    assert!(keys.is_empty());
}

#[tokio::test]
async fn values_sent_with_default_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/values")))
        .and(body_partial_json(json!({"key": "$metadata.level", "type": "string", "limit": 50})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": [{"key": "$metadata.level", "type": "string", "value": "error", "dataset": "cloudflare-workers"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = ValuesRequest::new(Timeframe::new(0, 1), "$metadata.level", ValueType::String);
    let values = executor(&server)
        .list_values(&account(), &request)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(values[0].value.as_str(), Some("error"));
}

#[tokio::test]
async fn preflight_then_query_through_tools() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/keys")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": [{"key": "$workers.wallTimeMs", "type": "number", "lastSeenAt": 1_700_000_000_000u64}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/query")))
        .and(body_partial_json(json!({
            "parameters": {"calculations": [{"key": "$workers.wallTimeMs", "operator": "avg"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": {"calculations": [], "statistics": statistics()}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tools = ObservabilityTools::new(executor(&server));
    let account = account();

    let keys: Value = serde_json::from_str(
        &tools
            .call(KEYS_TOOL, &json!({"keysQuery": {"limit": 1000}}), Some(&account))
            .await,
    )
    .unwrap();
    let key = keys[0]["key"].as_str().unwrap();

    let out = tools
        .call(
            QUERY_TOOL,
            &json!({"query": {
                "queryId": "q5",
                "parameters": {"calculations": [{"key": key, "keyType": "number", "operator": "avg"}]},
                "timeframe": {"from": 0, "to": 1}
            }}),
            Some(&account),
        )
        .await;

    let payload: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(payload["calculations"], json!([]));
    assert_eq!(payload["statistics"]["rows_read"], json!(1200.0));
}

#[tokio::test]
async fn tool_reports_transmission_failure_as_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TELEMETRY}/keys")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let tools = ObservabilityTools::new(executor(&server));
    let out = tools
        .call(KEYS_TOOL, &json!({"keysQuery": {}}), Some(&account()))
        .await;

    let payload: Value = serde_json::from_str(&out).unwrap();
    assert!(payload["error"]
        .as_str()
        .unwrap()
        .starts_with("Error retrieving worker telemetry keys: Transmission error"));
}

/// Reads one request, then answers 500 with a body shorter than its
/// declared length and hangs up
async fn truncated_error_server() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
        }
        socket
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial")
            .await
            .unwrap();
        socket.shutdown().await.ok();
    });

    format!("http://{addr}/client/v4")
}

#[tokio::test]
async fn unreadable_error_body_is_reported() {
    let base_url = truncated_error_server().await;
    let executor = QueryExecutor::from_config(&ApiConfig {
        base_url,
        timeout_secs: 5,
        ..ApiConfig::default()
    })
    .unwrap();

    let err = executor
        .list_keys(&account(), &KeysRequest::default())
        .await
        .unwrap_err();

    match err {
        Error::Transmission {
            message, status, ..
        } => {
            assert_eq!(status, Some(500));
            assert!(message.contains("<body unavailable"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

