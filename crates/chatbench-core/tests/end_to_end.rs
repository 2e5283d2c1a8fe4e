use std::sync::Arc;
use std::time::Duration;

use chatbench_client::{fetch_model_ids, HttpIssuer};
use chatbench_common::{BenchConfig, BenchError, RunConfig};
use chatbench_core::{RunDriver, RunSummary};
use chatbench_server::{app, AppState, MockServerConfig};

async fn spawn_mock(config: MockServerConfig) -> (String, AppState) {
    let (router, state) = app(config).unwrap();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (format!("http://{}:{}", addr.ip(), addr.port()), state)
}

fn config_for(base: &str, overrides: impl FnOnce(&mut BenchConfig)) -> RunConfig {
    let mut cfg = BenchConfig {
        base_url: base.to_string(),
        requests: 20,
        concurrency: 4,
        input_len: 4,
        output_len: 8,
        timeout_secs: 10,
        ..BenchConfig::default()
    };
    overrides(&mut cfg);
    cfg.into_run_config("mock-model").unwrap()
}

async fn run(config: RunConfig) -> chatbench_common::Result<RunSummary> {
    let issuer = Arc::new(HttpIssuer::new(&config)?);
    RunDriver::new(config, issuer)?.with_host_sampling(false).run().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_run_against_mock_server() {
    let (base, state) = spawn_mock(MockServerConfig::default()).await;

    let summary = run(config_for(&base, |_| {})).await.unwrap();

    assert_eq!(state.requests_seen(), 20);
    assert_eq!(summary.issued, 20);
    assert_eq!(summary.report.completed_count, 20);
    // 4 prompt words + 8 completion tokens per request
    assert_eq!(summary.report.total_tokens, 20 * 12);
    assert!(summary.report.mean_latency > 0.0);
    assert!(summary.report.p50_latency <= summary.report.p90_latency);
    assert!(summary.report.p90_latency <= summary.report.p99_latency);
    assert!(summary.report.requests_per_second > 0.0);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.report.mean_ttft, None);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["completed_count"], 20);
    assert_eq!(json["issued"], 20);
    assert!(json.get("host").is_none());
    assert!(json.get("mean_ttft").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_errors_are_counted_not_fatal() {
    let (base, state) =
        spawn_mock(MockServerConfig { fail_every: Some(5), ..MockServerConfig::default() }).await;

    let summary = run(config_for(&base, |_| {})).await.unwrap();

    assert_eq!(state.requests_seen(), 20);
    assert_eq!(summary.report.completed_count, 16);
    assert_eq!(summary.failures.get("status"), Some(&4));
    assert_eq!(summary.report.total_tokens, 16 * 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn streaming_run_reports_ttft_and_usage() {
    let (base, _) =
        spawn_mock(MockServerConfig { stream_chunks: 3, ..MockServerConfig::default() }).await;

    let summary = run(config_for(&base, |c| {
        c.stream = true;
        c.requests = 8;
    }))
    .await
    .unwrap();

    assert_eq!(summary.report.completed_count, 8);
    assert_eq!(summary.report.total_tokens, 8 * 12);
    let ttft = summary.report.mean_ttft.expect("streamed runs carry ttft");
    assert!(ttft <= summary.report.mean_latency);
}

#[tokio::test]
async fn missing_usage_counts_zero_tokens() {
    let (base, _) =
        spawn_mock(MockServerConfig { include_usage: false, ..MockServerConfig::default() }).await;

    let summary = run(config_for(&base, |c| c.requests = 3)).await.unwrap();

    assert_eq!(summary.report.completed_count, 3);
    assert_eq!(summary.report.total_tokens, 0);
    assert_eq!(summary.report.tokens_per_second, 0.0);
}

#[tokio::test]
async fn unreachable_server_yields_insufficient_data() {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = run(config_for(&base, |c| c.requests = 5)).await.unwrap_err();

    assert!(matches!(err, BenchError::InsufficientData { issued: 5 }));
}

#[tokio::test]
async fn slow_responses_time_out_per_request() {
    let (base, _) = spawn_mock(MockServerConfig {
        latency: Duration::from_millis(1500),
        ..MockServerConfig::default()
    })
    .await;

    let config = config_for(&base, |c| {
        c.requests = 2;
        c.concurrency = 2;
        c.timeout_secs = 1;
    });
    let issuer = Arc::new(HttpIssuer::new(&config).unwrap());
    let driver = RunDriver::new(config, issuer).unwrap().with_host_sampling(false);

    let err = driver.run().await.unwrap_err();

    assert!(matches!(err, BenchError::InsufficientData { issued: 2 }));
    assert_eq!(driver.metrics().failed("timeout"), 2);
}

#[tokio::test]
async fn discovers_served_model() {
    let (base, _) = spawn_mock(MockServerConfig {
        model_id: "qwen-moe".into(),
        ..MockServerConfig::default()
    })
    .await;
    let cfg = BenchConfig { base_url: base, ..BenchConfig::default() };

    let ids = fetch_model_ids(&cfg.models_url(), Duration::from_secs(5)).await.unwrap();

    assert_eq!(ids, vec!["qwen-moe".to_string()]);
}

#[tokio::test]
async fn oversized_usage_counts_saturate() {
    let router = axum::Router::new().route(
        "/v1/chat/completions",
        axum::routing::post(|| async {
            axum::Json(serde_json::json!({
                "id": "huge",
                "usage": {"prompt_tokens": u64::MAX, "completion_tokens": 1},
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let summary = run(config_for(&base, |c| {
        c.requests = 3;
        c.concurrency = 1;
    }))
    .await
    .unwrap();

    assert_eq!(summary.issued, 3);
    assert_eq!(summary.report.completed_count, 3);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.report.total_tokens, u64::MAX);
}
