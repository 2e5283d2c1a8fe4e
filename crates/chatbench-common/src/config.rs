use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{BenchError, Result};

pub const CONFIG_PATH_VAR: &str = "CHATBENCH_CONFIG";

/// Loose, layered settings as read from defaults, a YAML file and the environment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub base_url: String,
    /// `None` means ask the server via `/v1/models`.
    pub model: Option<String>,
    pub requests: usize,
    pub concurrency: usize,
    pub input_len: usize,
    pub output_len: usize,
    pub timeout_secs: u64,
    pub stream: bool,
    pub warmup: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            model: None,
            requests: 256,
            concurrency: 8,
            input_len: 32,
            output_len: 512,
            timeout_secs: 300,
            stream: false,
            warmup: 0,
        }
    }
}

impl BenchConfig {
    /// Defaults, then the file named by `CHATBENCH_CONFIG`, then process env.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var(CONFIG_PATH_VAR) {
            Ok(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    BenchError::Configuration(format!("cannot read {path}: {e}"))
                })?;
                Self::from_yaml_str(&text)?
            }
            Err(_) => Self::default(),
        };
        cfg.apply_env(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| BenchError::Configuration(format!("invalid config file: {e}")))
    }

    /// Overlay `BASE`, `MODEL`, `N`, `C`, `IN_LEN`, `OUT_LEN`, `TIMEOUT_SECS`, `STREAM` and
    /// `WARMUP`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BASE") { self.base_url = v; }
        if let Some(v) = lookup("MODEL") { self.model = Some(v); }
        if let Some(v) = parse_var(&lookup, "N")? { self.requests = v; }
        if let Some(v) = parse_var(&lookup, "C")? { self.concurrency = v; }
        if let Some(v) = parse_var(&lookup, "IN_LEN")? { self.input_len = v; }
        if let Some(v) = parse_var(&lookup, "OUT_LEN")? { self.output_len = v; }
        if let Some(v) = parse_var(&lookup, "TIMEOUT_SECS")? { self.timeout_secs = v; }
        if let Some(v) = parse_var(&lookup, "WARMUP")? { self.warmup = v; }
        if let Some(v) = lookup("STREAM") { self.stream = parse_flag("STREAM", &v)?; }
        Ok(())
    }

    pub fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url.trim_end_matches('/'))
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Validate and freeze. `model_id` wins over `self.model` so callers can pass a discovered id.
    pub fn into_run_config(self, model_id: impl Into<String>) -> Result<RunConfig> {
        let model_id = model_id.into();
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(BenchError::Configuration(format!(
                "base url must be http(s), got {:?}",
                self.base_url
            )));
        }
        if model_id.trim().is_empty() {
            return Err(BenchError::Configuration("model id must not be empty".into()));
        }
        positive("total requests (N)", self.requests)?;
        positive("concurrency (C)", self.concurrency)?;
        positive("input length", self.input_len)?;
        positive("output length", self.output_len)?;
        if self.timeout_secs == 0 {
            return Err(BenchError::Configuration("request timeout must be positive".into()));
        }
        Ok(RunConfig {
            endpoint_url: self.chat_completions_url(),
            model_id,
            total_requests: self.requests,
            concurrency: self.concurrency,
            prompt_tokens_approx: self.input_len,
            max_output_tokens: self.output_len,
            request_timeout: Duration::from_secs(self.timeout_secs),
            stream: self.stream,
            warmup_requests: self.warmup,
        })
    }
}

/// Validated, immutable settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub endpoint_url: String,
    pub model_id: String,
    pub total_requests: usize,
    pub concurrency: usize,
    pub prompt_tokens_approx: usize,
    pub max_output_tokens: usize,
    pub request_timeout: Duration,
    pub stream: bool,
    pub warmup_requests: usize,
}

impl RunConfig {
    /// Workers that will actually get work: `min(C, N)`.
    pub fn effective_workers(&self) -> usize {
        self.concurrency.min(self.total_requests)
    }
}

fn positive(what: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(BenchError::Configuration(format!("{what} must be at least 1")));
    }
    Ok(())
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            BenchError::Configuration(format!("{key}={raw:?} is not a valid number"))
        }),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(BenchError::Configuration(format!("{key}={raw:?} is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let mut cfg = BenchConfig::default();
        cfg.apply_env(env_of(&[("N", "10"), ("C", "2"), ("MODEL", "m"), ("STREAM", "true")]))
            .unwrap();
        assert_eq!(cfg.requests, 10);
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.model.as_deref(), Some("m"));
        assert!(cfg.stream);
        assert_eq!(cfg.output_len, 512);
    }

    #[test]
    fn env_rejects_garbage_numbers() {
        let mut cfg = BenchConfig::default();
        let err = cfg.apply_env(env_of(&[("C", "eight")])).unwrap_err();
        assert!(matches!(err, BenchError::Configuration(_)));
    }

    #[test]
    fn yaml_fills_unset_fields_with_defaults() {
        let cfg = BenchConfig::from_yaml_str("requests: 4\nbase_url: http://h:1/\n").unwrap();
        assert_eq!(cfg.requests, 4);
        assert_eq!(cfg.concurrency, 8);
        assert_eq!(cfg.chat_completions_url(), "http://h:1/v1/chat/completions");
        assert_eq!(cfg.models_url(), "http://h:1/v1/models");
    }

    #[test]
    fn zero_requests_or_workers_fail_fast() {
        let cfg = BenchConfig { requests: 0, ..BenchConfig::default() };
        assert!(matches!(cfg.into_run_config("m"), Err(BenchError::Configuration(_))));
        let cfg = BenchConfig { concurrency: 0, ..BenchConfig::default() };
        assert!(matches!(cfg.into_run_config("m"), Err(BenchError::Configuration(_))));
    }

    #[test]
    fn empty_model_is_rejected() {
        assert!(BenchConfig::default().into_run_config("  ").is_err());
    }

    #[test]
    fn run_config_carries_validated_fields() {
        let cfg = BenchConfig {
            requests: 3,
            concurrency: 16,
            timeout_secs: 5,
            ..BenchConfig::default()
        };
        let run = cfg.into_run_config("qwen").unwrap();
        assert_eq!(run.endpoint_url, "http://127.0.0.1:8000/v1/chat/completions");
        assert_eq!(run.request_timeout, Duration::from_secs(5));
        assert_eq!(run.effective_workers(), 3);
    }
}
