use serde::Serialize;

/// Measurements of one completed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestOutcome {
    pub latency_seconds: f64,
    /// prompt + completion tokens reported by the server, 0 when usage is missing.
    pub token_count: u64,
    pub response_id: String,
    /// Time to the first streamed event; `None` for non-streamed requests.
    pub ttft_seconds: Option<f64>,
}

impl RequestOutcome {
    pub fn new(latency_seconds: f64, token_count: u64, response_id: impl Into<String>) -> Self {
        Self {
            latency_seconds,
            token_count,
            response_id: response_id.into(),
            ttft_seconds: None,
        }
    }

    pub fn with_ttft(mut self, ttft_seconds: f64) -> Self {
        self.ttft_seconds = Some(ttft_seconds);
        self
    }
}
