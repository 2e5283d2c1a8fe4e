//! Chat-completions request body and the lenient readers for response fields.

use chatbench_common::RunConfig;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

impl<'a> ChatCompletionRequest<'a> {
    pub fn for_run(config: &'a RunConfig, prompt: &'a str) -> Self {
        Self {
            model: &config.model_id,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            max_tokens: config.max_output_tokens,
            stream: config.stream,
            stream_options: config.stream.then_some(StreamOptions { include_usage: true }),
        }
    }
}

/// `"hello hello ..."` with one word per requested prompt token.
pub fn synthetic_prompt(approx_tokens: usize) -> String {
    vec!["hello"; approx_tokens].join(" ")
}

/// `usage.prompt_tokens + usage.completion_tokens`; anything missing or ill-typed counts as 0.
pub fn usage_tokens(body: &Value) -> u64 {
    let Some(usage) = body.get("usage").filter(|u| u.is_object()) else { return 0 };
    let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
    field("prompt_tokens").saturating_add(field("completion_tokens"))
}

pub fn has_usage(body: &Value) -> bool {
    body.get("usage").is_some_and(Value::is_object)
}

pub fn response_id(body: &Value) -> Option<&str> {
    body.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbench_common::BenchConfig;
    use serde_json::json;

    #[test]
    fn prompt_has_requested_word_count() {
        assert_eq!(synthetic_prompt(3), "hello hello hello");
        assert_eq!(synthetic_prompt(1), "hello");
    }

    #[test]
    fn usage_sums_prompt_and_completion() {
        let body = json!({"id": "x", "usage": {"prompt_tokens": 32, "completion_tokens": 100}});
        assert_eq!(usage_tokens(&body), 132);
        assert_eq!(response_id(&body), Some("x"));
    }

    #[test]
    fn missing_or_null_usage_is_zero() {
        assert_eq!(usage_tokens(&json!({"id": "x"})), 0);
        assert_eq!(usage_tokens(&json!({"usage": null})), 0);
        assert_eq!(usage_tokens(&json!({"usage": {"prompt_tokens": "many"}})), 0);
        assert_eq!(response_id(&json!({"id": ""})), None);
    }

    #[test]
    fn oversized_usage_saturates() {
        let body = json!({"usage": {"prompt_tokens": u64::MAX, "completion_tokens": 7}});
        assert_eq!(usage_tokens(&body), u64::MAX);
    }

    #[test]
    fn non_streaming_body_omits_stream_fields() {
        let run = BenchConfig::default().into_run_config("m").unwrap();
        let prompt = synthetic_prompt(2);
        let body = serde_json::to_value(ChatCompletionRequest::for_run(&run, &prompt)).unwrap();
        assert_eq!(body["model"], "m");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["content"], "hello hello");
        assert!(body.get("stream").is_none());
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn streaming_body_requests_usage() {
        let run = BenchConfig { stream: true, ..BenchConfig::default() }
            .into_run_config("m")
            .unwrap();
        let body = serde_json::to_value(ChatCompletionRequest::for_run(&run, "hi")).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }
}
