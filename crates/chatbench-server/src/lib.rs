//! Mock OpenAI-style chat-completions server (JSON + SSE) for exercising the load generator.

use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{sse::{Event, Sse}, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use rand::Rng;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

#[derive(Debug, Clone)]
pub struct MockServerConfig {
    pub model_id: String,
    /// Fixed delay before answering.
    pub latency: Duration,
    /// Extra uniform random delay in `[0, jitter]`.
    pub jitter: Duration,
    /// Probability of answering 500.
    pub error_rate: f64,
    /// Deterministically fail every k-th request (1-based).
    pub fail_every: Option<usize>,
    pub include_usage: bool,
    pub stream_chunks: usize,
    pub chunk_delay: Duration,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            model_id: "mock-model".into(),
            latency: Duration::from_millis(5),
            jitter: Duration::ZERO,
            error_rate: 0.0,
            fail_every: None,
            include_usage: true,
            stream_chunks: 4,
            chunk_delay: Duration::from_millis(1),
        }
    }
}

#[derive(Clone)]
struct ServerMetrics {
    registry: Registry,
    requests_total: IntCounter,
    failures_total: IntCounter,
    completion_tokens_total: IntCounter,
    latency_seconds: Histogram,
}

impl ServerMetrics {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let requests_total =
            IntCounter::new("mock_requests_total", "Chat completion requests received")?;
        let failures_total =
            IntCounter::new("mock_failures_total", "Requests answered with an injected error")?;
        let completion_tokens_total =
            IntCounter::new("mock_completion_tokens_total", "Completion tokens reported in usage")?;
        let latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "mock_injected_latency_seconds",
            "Artificial delay applied before answering",
        ))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;
        registry.register(Box::new(completion_tokens_total.clone()))?;
        registry.register(Box::new(latency_seconds.clone()))?;
        Ok(Self {
            registry,
            requests_total,
            failures_total,
            completion_tokens_total,
            latency_seconds,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<MockServerConfig>,
    seen: Arc<AtomicUsize>,
    metrics: ServerMetrics,
}

impl AppState {
    /// Number of chat-completion requests received so far.
    pub fn requests_seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }
}

pub fn app(config: MockServerConfig) -> prometheus::Result<(Router, AppState)> {
    let state = AppState {
        config: Arc::new(config),
        seen: Arc::new(AtomicUsize::new(0)),
        metrics: ServerMetrics::new()?,
    };
    let router = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state.clone());
    Ok((router, state))
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    config: MockServerConfig,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (router, _) = app(config).map_err(std::io::Error::other)?;
    tracing::info!(target: "mock", "listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await
}

async fn metrics(State(state): State<AppState>) -> Response {
    let families = state.metrics.registry.gather();
    let mut buffer = Vec::new();
    match ENCODER.encode(&families, &mut buffer) {
        Ok(()) => ([("content-type", ENCODER.format_type().to_string())], buffer).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "object": "list",
        "data": [{"id": state.config.model_id, "object": "model", "owned_by": "chatbench"}],
    }))
}

#[derive(serde::Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(serde::Deserialize, Default)]
struct StreamOptions {
    #[serde(default)]
    include_usage: bool,
}

#[derive(serde::Deserialize)]
struct ChatRequest {
    model: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    stream: bool,
    stream_options: Option<StreamOptions>,
    max_tokens: Option<u64>,
}

async fn chat_completions(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let n = state.seen.fetch_add(1, Ordering::SeqCst) + 1;
    state.metrics.requests_total.inc();
    let cfg = &state.config;

    let (inject_error, delay) = {
        let mut rng = rand::thread_rng();
        let periodic = cfg.fail_every.is_some_and(|k| k > 0 && n % k == 0);
        let random = cfg.error_rate > 0.0 && rng.gen::<f64>() < cfg.error_rate;
        let jitter = if cfg.jitter.is_zero() {
            Duration::ZERO
        } else {
            cfg.jitter.mul_f64(rng.gen::<f64>())
        };
        (periodic || random, cfg.latency + jitter)
    };
    if inject_error {
        state.metrics.failures_total.inc();
        tracing::debug!(target: "mock", "request {} answered with injected error", n);
        let body = Json(json!({"error": {"message": "injected failure", "type": "server_error"}}));
        return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
    }
    state.metrics.latency_seconds.observe(delay.as_secs_f64());
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let prompt_tokens: u64 = req
        .messages
        .iter()
        .filter(|m| m.role == "system" || m.role == "user")
        .map(|m| m.content.split_whitespace().count() as u64)
        .sum();
    let completion_tokens = req.max_tokens.unwrap_or(16);
    state.metrics.completion_tokens_total.inc_by(completion_tokens);

    let id = format!("chatcmpl-{n}");
    let model = req.model.unwrap_or_else(|| cfg.model_id.clone());
    let usage = json!({
        "prompt_tokens": prompt_tokens,
        "completion_tokens": completion_tokens,
        "total_tokens": prompt_tokens + completion_tokens,
    });

    if req.stream {
        let want_usage = cfg.include_usage && req.stream_options.unwrap_or_default().include_usage;
        let chunks = cfg.stream_chunks.max(1);
        let chunk_delay = cfg.chunk_delay;
        let (tx, rx) = tokio::sync::mpsc::channel::<serde_json::Value>(16);
        tokio::spawn(async move {
            for i in 0..chunks {
                let chunk = json!({
                    "id": id,
                    "object": "chat.completion.chunk",
                    "model": model,
                    "choices": [{
                        "index": 0,
                        "delta": {"content": format!("tok{i} ")},
                        "finish_reason": null,
                    }],
                });
                if tx.send(chunk).await.is_err() {
                    return;
                }
                if !chunk_delay.is_zero() {
                    tokio::time::sleep(chunk_delay).await;
                }
            }
            if want_usage {
                let usage_chunk = json!({
                    "id": id,
                    "object": "chat.completion.chunk",
                    "model": model,
                    "choices": [],
                    "usage": usage,
                });
                let _ = tx.send(usage_chunk).await;
            }
        });
        let events = ReceiverStream::new(rx)
            .map(|v| Ok::<_, Infallible>(Event::default().data(v.to_string())))
            .chain(tokio_stream::once(Ok::<_, Infallible>(Event::default().data("[DONE]"))));
        return Sse::new(events).into_response();
    }

    let reply = vec!["hello"; completion_tokens.min(64) as usize].join(" ");
    let mut body = json!({
        "id": id,
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": reply},
            "finish_reason": "stop",
        }],
    });
    if cfg.include_usage {
        body["usage"] = usage;
    }
    Json(body).into_response()
}
