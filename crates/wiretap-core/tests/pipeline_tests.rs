//! End-to-end tests for the interceptor pipeline.

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use http::{Request, Response, StatusCode};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, Full, StreamBody};
use std::convert::Infallible;
use std::fmt::Debug;
use std::io;
use std::time::Duration;
use wiretap_core::{
    ErrorKind, Interceptor, InterceptorConfig, MemorySink, ReplayBody, Severity, Stage,
    BODY_TOO_LARGE, MASK, SKIPPED_BODY,
};

type Incoming = Request<ReplayBody<Full<Bytes>>>;

fn config() -> InterceptorConfig {
    InterceptorConfig::new()
        .hostname("test-host")
        .app_version("1.0.0")
}

fn get(uri: &str) -> Request<Full<Bytes>> {
    Request::get(uri).body(Full::new(Bytes::new())).unwrap()
}

async fn ok(_request: Incoming) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(Response::builder()
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(r#"{"ok":true}"#)))
        .unwrap())
}

/// Stream a response body to its end, as a transport would.
async fn drain<B>(response: Response<B>) -> Bytes
where
    B: Body<Data = Bytes>,
    B::Error: Debug,
{
    response.into_body().collect().await.unwrap().to_bytes()
}

fn summary_total(sink: &MemorySink) -> u64 {
    sink.summaries().iter().map(|s| s.total).sum()
}

fn summary_count(sink: &MemorySink, status: u16) -> u64 {
    sink.summaries()
        .iter()
        .filter_map(|s| s.status_counts.get(&status))
        .sum()
}

#[tokio::test]
async fn test_zero_sample_rate_emits_no_records_but_counts_everything() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config().sample_rate(0.0), sink.clone()).unwrap();

    for i in 0..50 {
        let response = interceptor
            .intercept(get(&format!("/api/items/{}", i)), ok)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-correlation-id"));
    }

    interceptor.shutdown().await;

    assert!(sink.records().is_empty());
    assert_eq!(summary_total(&sink), 50);
    assert_eq!(summary_count(&sink, 200), 50);
}

#[tokio::test]
async fn test_full_sample_rate_emits_one_record_per_request() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config(), sink.clone()).unwrap();

    for i in 0..10 {
        let response = interceptor
            .intercept(get(&format!("/api/items/{}", i)), ok)
            .await
            .unwrap();
        drain(response).await;
    }

    interceptor.shutdown().await;

    let records = sink.records();
    assert_eq!(records.len(), 10);
    assert_eq!(records[3].request.url, "/api/items/3");
    assert_eq!(interceptor.stats().records_emitted, 10);
    assert_eq!(summary_total(&sink), 10);
}

#[tokio::test]
async fn test_oversized_body_is_replaced_but_handler_sees_everything() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config().max_body_size(100), sink.clone()).unwrap();

    let payload = "x".repeat(5000);
    let request = Request::post("/upload")
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from(payload.clone())))
        .unwrap();

    let response = interceptor
        .intercept(request, |request: Incoming| async move {
            let body = request.into_body().collect().await.unwrap().to_bytes();
            Ok::<_, Infallible>(
                Response::builder()
                    .header("content-type", "text/plain")
                    .body(Full::new(body))
                    .unwrap(),
            )
        })
        .await
        .unwrap();

    let echoed = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(echoed, payload.as_str());

    interceptor.shutdown().await;

    let records = sink.records();
    assert_eq!(records[0].request.body, BODY_TOO_LARGE);
    assert_eq!(
        records[0].response.as_ref().unwrap().body.as_deref(),
        Some(BODY_TOO_LARGE)
    );
}

#[tokio::test]
async fn test_sensitive_keys_are_masked_case_insensitively() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config().mask_field("session"), sink.clone()).unwrap();

    let request = Request::get("/api/me?Token=abc&page=1&SESSION=s1")
        .header("Authorization", "Bearer xyz")
        .header("Accept", "application/json")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = interceptor.intercept(request, ok).await.unwrap();
    drain(response).await;
    interceptor.shutdown().await;

    let record = &sink.records()[0];
    assert_eq!(record.request.headers["authorization"], MASK);
    assert_eq!(record.request.headers["accept"], "application/json");
    assert_eq!(record.request.query_params["Token"], MASK);
    assert_eq!(record.request.query_params["SESSION"], MASK);
    assert_eq!(record.request.query_params["page"][0], "1");
}

#[tokio::test(start_paused = true)]
async fn test_slow_request_raises_alert() {
    let sink = MemorySink::new();
    let interceptor =
        Interceptor::new(config().latency_threshold(1.0), sink.clone()).unwrap();

    let response = interceptor
        .intercept(get("/reports"), |request: Incoming| async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            ok(request).await
        })
        .await
        .unwrap();
    drain(response).await;
    interceptor.shutdown().await;

    let alerts = sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].url, "/reports");
    assert!(alerts[0].latency > 1.0);
    assert_eq!(alerts[0].threshold, 1.0);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].severity, Severity::Warn);
    assert_eq!(interceptor.stats().alerts_emitted, 1);
}

#[tokio::test]
async fn test_excluded_paths_are_counted_but_never_recorded() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config().skip_path("/internal/*"), sink.clone()).unwrap();

    let response = interceptor.intercept(get("/health"), ok).await.unwrap();
    assert!(!response.headers().contains_key("x-correlation-id"));
    interceptor
        .intercept(get("/internal/debug"), ok)
        .await
        .unwrap();

    interceptor.shutdown().await;

    assert!(sink.records().is_empty());
    assert_eq!(summary_total(&sink), 2);
}

#[tokio::test(start_paused = true)]
async fn test_documented_example_exchange() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(
        config()
            .sample_rate(1.0)
            .max_body_size(100)
            .latency_threshold(1.0),
        sink.clone(),
    )
    .unwrap();

    let request = Request::get("/api/data")
        .header("authorization", "Bearer xyz")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = interceptor
        .intercept(request, |request: Incoming| async move {
            tokio::time::sleep(Duration::from_millis(67)).await;
            ok(request).await
        })
        .await
        .unwrap();
    assert_eq!(drain(response).await, r#"{"ok":true}"#);
    interceptor.shutdown().await;

    let records = sink.records();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.request.method, "GET");
    assert_eq!(record.request.url, "/api/data");
    assert_eq!(record.request.headers["authorization"], MASK);
    assert_eq!(record.request.body, "");

    let response = record.response.as_ref().unwrap();
    assert_eq!(response.status_code, 200);
    assert!((0.067..0.08).contains(&response.latency), "latency {}", response.latency);
    assert_eq!(record.metadata.hostname, "test-host");
    assert_eq!(record.metadata.app_version, "1.0.0");
    assert!(sink.alerts().is_empty());
}

#[tokio::test]
async fn test_handler_error_propagates_and_is_recorded() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config(), sink.clone()).unwrap();

    let result = interceptor
        .intercept(get("/broken"), |_request: Incoming| async move {
            Err::<Response<Full<Bytes>>, _>(io::Error::new(io::ErrorKind::Other, "database down"))
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::Other);
    assert_eq!(err.to_string(), "database down");

    interceptor.shutdown().await;

    let record = &sink.records()[0];
    assert!(record.response.is_none());
    let error = record.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::HandlerError);
    assert!(error.class.as_deref().unwrap().contains("io"));
    assert!(!record.to_json().unwrap().contains("database down"));
    assert_eq!(record.severity, Severity::Error);
    assert_eq!(summary_count(&sink, 500), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_exchange_emits_aborted_record() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config(), sink.clone()).unwrap();

    let request = Request::post("/slow")
        .body(Full::new(Bytes::from("partial")))
        .unwrap();
    let exchange = interceptor.intercept(request, |_request: Incoming| async move {
        std::future::pending::<Result<Response<Full<Bytes>>, Infallible>>().await
    });

    let timed_out = tokio::time::timeout(Duration::from_millis(10), exchange).await;
    assert!(timed_out.is_err());
    assert_eq!(interceptor.aggregator().pending(), 0);

    interceptor.shutdown().await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let error = records[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Aborted);
    assert_eq!(error.stage, Some(Stage::AwaitingHandler));
    assert_eq!(records[0].request.body, "partial");
    assert_eq!(summary_total(&sink), 0);
}

#[tokio::test]
async fn test_failing_sink_never_alters_response() {
    let sink = MemorySink::new();
    sink.set_failing(true);
    let interceptor = Interceptor::new(config(), sink.clone()).unwrap();

    let response = interceptor.intercept(get("/api/data"), ok).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.into_body().collect().await.unwrap().to_bytes(),
        r#"{"ok":true}"#
    );

    interceptor.shutdown().await;

    let stats = interceptor.stats();
    assert!(stats.sink_failures >= 1);
    assert_eq!(stats.records_emitted, 0);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_correlation_id_is_reused_or_generated() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config(), sink.clone()).unwrap();

    let request = Request::get("/api/data")
        .header("x-correlation-id", "trace-42")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = interceptor.intercept(request, ok).await.unwrap();
    assert_eq!(response.headers()["x-correlation-id"], "trace-42");
    drain(response).await;

    let response = interceptor.intercept(get("/api/data"), ok).await.unwrap();
    let generated = response.headers()["x-correlation-id"]
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(generated.len(), 36);
    drain(response).await;

    interceptor.shutdown().await;

    let records = sink.records();
    assert_eq!(records[0].metadata.correlation_id, "trace-42");
    assert_eq!(records[1].metadata.correlation_id, generated);
}

#[tokio::test]
async fn test_response_body_capture_rules() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config(), sink.clone()).unwrap();

    interceptor
        .intercept(get("/logo.png"), |_request: Incoming| async move {
            Ok::<_, Infallible>(
                Response::builder()
                    .header("content-type", "image/png")
                    .body(Full::new(Bytes::from_static(&[0x89, 0x50, 0x4e, 0x47])))
                    .unwrap(),
            )
        })
        .await
        .unwrap();
    interceptor.shutdown().await;

    let record = &sink.records()[0];
    assert_eq!(
        record.response.as_ref().unwrap().body.as_deref(),
        Some(SKIPPED_BODY)
    );

    let sink = MemorySink::new();
    let interceptor =
        Interceptor::new(config().capture_response_body(false), sink.clone()).unwrap();
    interceptor.intercept(get("/api/data"), ok).await.unwrap();
    interceptor.shutdown().await;

    let json = sink.records()[0].to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["response"].get("body").is_none());
    assert_eq!(value["response"]["status_code"], 200);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_flush_emits_window_summaries() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(
        config().aggregation_interval(10.0).emit_empty_summaries(false),
        sink.clone(),
    )
    .unwrap();

    for _ in 0..3 {
        interceptor.intercept(get("/api/data"), ok).await.unwrap();
    }

    tokio::time::sleep(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;

    let summaries = sink.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].total, 3);

    // Empty windows are skipped.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(sink.summaries().len(), 1);

    interceptor.intercept(get("/missing"), |_request: Incoming| async move {
        Ok::<_, Infallible>(
            Response::builder()
                .status(404)
                .body(Full::new(Bytes::new()))
                .unwrap(),
        )
    })
    .await
    .unwrap();
    interceptor.shutdown().await;

    let summaries = sink.summaries();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[1].status_counts.get(&404), Some(&1));
}

#[tokio::test]
async fn test_streaming_response_is_delivered_before_it_ends() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config(), sink.clone()).unwrap();

    let exchange = interceptor.intercept(get("/ticks"), |_request: Incoming| async move {
        let first = Ok::<_, Infallible>(Frame::data(Bytes::from_static(b"tick\n")));
        let ticks = stream::iter(vec![first]).chain(stream::pending());
        Ok::<_, Infallible>(
            Response::builder()
                .header("content-type", "text/plain")
                .body(StreamBody::new(ticks))
                .unwrap(),
        )
    });

    let response = tokio::time::timeout(Duration::from_secs(2), exchange)
        .await
        .expect("response headers delivered")
        .unwrap();
    assert!(response.headers().contains_key("x-correlation-id"));

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("first frame delivered")
        .unwrap()
        .unwrap();
    assert_eq!(frame.into_data().unwrap(), "tick\n");
    assert!(body.is_capturing());

    // The client goes away while the body is still streaming.
    drop(body);
    interceptor.shutdown().await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let error = records[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Aborted);
    assert_eq!(error.stage, Some(Stage::CapturingResponse));
    assert_eq!(summary_count(&sink, 200), 1);
}

#[tokio::test]
async fn test_streamed_response_is_recorded_once_fully_sent() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config(), sink.clone()).unwrap();

    let response = interceptor
        .intercept(get("/session"), |_request: Incoming| async move {
            let chunks: Vec<Result<Frame<Bytes>, Infallible>> =
                vec![r#"{"user":"bob","#, r#""token":"t-1"}"#]
                    .into_iter()
                    .map(|chunk| Ok(Frame::data(Bytes::from_static(chunk.as_bytes()))))
                    .collect();
            Ok::<_, Infallible>(
                Response::builder()
                    .header("content-type", "application/json")
                    .body(StreamBody::new(stream::iter(chunks)))
                    .unwrap(),
            )
        })
        .await
        .unwrap();

    tokio::task::yield_now().await;
    assert_eq!(interceptor.stats().records_emitted, 0);

    assert_eq!(drain(response).await, r#"{"user":"bob","token":"t-1"}"#);
    interceptor.shutdown().await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].response.as_ref().unwrap().body.as_deref(),
        Some(r#"{"token":"*****","user":"bob"}"#)
    );
}

#[tokio::test]
async fn test_head_response_is_recorded_without_body() {
    let sink = MemorySink::new();
    let interceptor = Interceptor::new(config(), sink.clone()).unwrap();

    let request = Request::head("/api/data")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = interceptor.intercept(request, ok).await.unwrap();
    // A transport drops HEAD response bodies without polling them.
    drop(response);
    interceptor.shutdown().await;

    let record = &sink.records()[0];
    assert!(record.error.is_none());
    assert_eq!(record.response.as_ref().unwrap().body.as_deref(), Some(""));
}
