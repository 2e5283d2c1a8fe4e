//! Observability for the load generator: per-run Prometheus metrics and host sampling

mod host;

pub use host::{HostSampler, HostUsage};

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

/// Client-side counters for one run. Each run owns its registry, so nothing leaks between runs.
#[derive(Clone)]
pub struct BenchMetrics {
    registry: Registry,
    requests_started: IntCounter,
    requests_succeeded: IntCounter,
    requests_failed: IntCounterVec,
    in_flight: IntGauge,
    latency_seconds: Histogram,
    tokens_total: IntCounter,
}

impl BenchMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("chatbench".into()), None)?;
        let requests_started = IntCounter::new("requests_started_total", "Requests sent")?;
        let requests_succeeded =
            IntCounter::new("requests_succeeded_total", "Requests that produced a sample")?;
        let requests_failed = IntCounterVec::new(
            Opts::new("requests_failed_total", "Requests that failed, by failure kind"),
            &["kind"],
        )?;
        let in_flight = IntGauge::new("requests_in_flight", "Requests awaiting a response")?;
        let latency_seconds = Histogram::with_opts(
            HistogramOpts::new("request_latency_seconds", "End-to-end request latency")
                .buckets(prometheus::exponential_buckets(0.005, 2.0, 18)?),
        )?;
        let tokens_total =
            IntCounter::new("tokens_total", "Prompt + completion tokens reported by the server")?;

        registry.register(Box::new(requests_started.clone()))?;
        registry.register(Box::new(requests_succeeded.clone()))?;
        registry.register(Box::new(requests_failed.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(latency_seconds.clone()))?;
        registry.register(Box::new(tokens_total.clone()))?;

        Ok(Self {
            registry,
            requests_started,
            requests_succeeded,
            requests_failed,
            in_flight,
            latency_seconds,
            tokens_total,
        })
    }

    pub fn request_started(&self) {
        self.requests_started.inc();
        self.in_flight.inc();
    }

    pub fn request_succeeded(&self, latency_seconds: f64, tokens: u64) {
        self.in_flight.dec();
        self.requests_succeeded.inc();
        self.latency_seconds.observe(latency_seconds);
        self.tokens_total.inc_by(tokens);
    }

    pub fn request_failed(&self, kind: &str) {
        self.in_flight.dec();
        self.requests_failed.with_label_values(&[kind]).inc();
    }

    pub fn started(&self) -> u64 {
        self.requests_started.get()
    }

    pub fn succeeded(&self) -> u64 {
        self.requests_succeeded.get()
    }

    pub fn failed(&self, kind: &str) -> u64 {
        self.requests_failed.with_label_values(&[kind]).get()
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = ENCODER.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(target: "obs", "metrics encoding failed: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_successes_and_failures() {
        let m = BenchMetrics::new().unwrap();
        for _ in 0..3 {
            m.request_started();
        }
        m.request_succeeded(0.25, 40);
        m.request_failed("timeout");
        m.request_failed("status");

        assert_eq!(m.started(), 3);
        assert_eq!(m.succeeded(), 1);
        assert_eq!(m.failed("timeout"), 1);
        assert_eq!(m.failed("status"), 1);

        let text = m.render();
        assert!(text.contains("chatbench_tokens_total 40"));
        assert!(text.contains("chatbench_requests_in_flight 0"));
    }

    #[test]
    fn registries_are_independent() {
        let a = BenchMetrics::new().unwrap();
        let b = BenchMetrics::new().unwrap();
        a.request_started();
        assert_eq!(b.started(), 0);
    }
}
