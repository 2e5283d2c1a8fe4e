//! HTTP issuer against an OpenAI-compatible `/v1/chat/completions`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chatbench_common::{BenchError, RequestFailure, RequestOutcome, RunConfig};
use serde_json::Value;
use tokio_stream::StreamExt as _;

use crate::sse::SseDecoder;
use crate::wire::{has_usage, response_id, synthetic_prompt, usage_tokens, ChatCompletionRequest};
use crate::RequestIssuer;

const ERROR_BODY_LIMIT: usize = 512;

pub struct HttpIssuer {
    client: reqwest::Client,
}

impl HttpIssuer {
    pub fn new(config: &RunConfig) -> chatbench_common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.effective_workers())
            .build()
            .map_err(|e| BenchError::Configuration(format!("cannot build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RequestIssuer for HttpIssuer {
    async fn issue(&self, config: &RunConfig) -> Result<RequestOutcome, RequestFailure> {
        let prompt = synthetic_prompt(config.prompt_tokens_approx);
        let body = ChatCompletionRequest::for_run(config, &prompt);

        let start = Instant::now();
        let response = self
            .client
            .post(&config.endpoint_url)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            if text.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(RequestFailure::Status { status: status.as_u16(), body: text });
        }

        if config.stream {
            read_event_stream(response, start).await
        } else {
            read_json(response, start).await
        }
    }
}

async fn read_json(
    response: reqwest::Response,
    start: Instant,
) -> Result<RequestOutcome, RequestFailure> {
    let bytes = response.bytes().await.map_err(classify)?;
    let latency = start.elapsed();
    let body: Value = serde_json::from_slice(&bytes)
        .map_err(|e| RequestFailure::MalformedBody(e.to_string()))?;
    Ok(RequestOutcome::new(
        latency.as_secs_f64(),
        usage_tokens(&body),
        response_id(&body).unwrap_or_default(),
    ))
}

async fn read_event_stream(
    response: reqwest::Response,
    start: Instant,
) -> Result<RequestOutcome, RequestFailure> {
    let mut stream = std::pin::pin!(response.bytes_stream());
    let mut decoder = SseDecoder::new();
    let mut acct = StreamAccounting::default();

    'read: while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify)?;
        for data in decoder.push(&chunk) {
            if acct.observe(&data, start.elapsed())? {
                break 'read;
            }
        }
    }
    if !acct.done {
        if let Some(tail) = decoder.finish() {
            acct.observe(&tail, start.elapsed())?;
        }
    }
    acct.into_outcome(start.elapsed())
}

/// Running tally over the `data:` payloads of one streamed response.
#[derive(Debug, Default)]
struct StreamAccounting {
    events: usize,
    first_event: Option<Duration>,
    id: Option<String>,
    tokens: u64,
    done: bool,
}

impl StreamAccounting {
    /// Returns `true` once the terminal `[DONE]` marker is seen.
    fn observe(&mut self, data: &str, at: Duration) -> Result<bool, RequestFailure> {
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(true);
        }
        if data.is_empty() {
            return Ok(false);
        }
        let event: Value = serde_json::from_str(data)
            .map_err(|e| RequestFailure::MalformedBody(format!("stream event: {e}")))?;
        self.events += 1;
        self.first_event.get_or_insert(at);
        if self.id.is_none() {
            self.id = response_id(&event).map(str::to_owned);
        }
        if has_usage(&event) {
            self.tokens = usage_tokens(&event);
        }
        Ok(false)
    }

    fn into_outcome(self, latency: Duration) -> Result<RequestOutcome, RequestFailure> {
        let Some(ttft) = self.first_event else {
            return Err(RequestFailure::MalformedBody("event stream carried no data".into()));
        };
        Ok(RequestOutcome::new(latency.as_secs_f64(), self.tokens, self.id.unwrap_or_default())
            .with_ttft(ttft.as_secs_f64()))
    }
}

fn classify(err: reqwest::Error) -> RequestFailure {
    if err.is_timeout() {
        RequestFailure::Timeout
    } else {
        RequestFailure::Transport(err.to_string())
    }
}

/// Ids listed by `GET {base}/v1/models`, in server order.
pub async fn fetch_model_ids(
    models_url: &str,
    timeout: Duration,
) -> chatbench_common::Result<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BenchError::Configuration(format!("cannot build http client: {e}")))?;
    let response = client
        .get(models_url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| {
            BenchError::Configuration(format!("model discovery at {models_url} failed: {e}"))
        })?;
    let body: Value = response
        .json()
        .await
        .map_err(|e| BenchError::Configuration(format!("model list is not JSON: {e}")))?;
    let ids: Vec<String> = body
        .get("data")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("id").and_then(Value::as_str))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    tracing::debug!(target: "issuer", "discovered {} model(s) at {}", ids.len(), models_url);
    Ok(ids)
}
