use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chatbench_client::RequestIssuer;
use chatbench_common::{BenchError, Result, RunConfig};
use chatbench_obs::{BenchMetrics, HostSampler, HostUsage};
use serde::Serialize;

use crate::aggregate::{aggregate, AggregateReport};
use crate::dispatch::dispatch;

const HOST_SAMPLE_EVERY: Duration = Duration::from_millis(500);

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub report: AggregateReport,
    /// Reservations granted; always `total_requests`.
    pub issued: usize,
    pub elapsed_seconds: f64,
    pub failures: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostUsage>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.report;
        write!(
            f,
            "requests: {}/{}  concurrency: {}  latency mean: {:.3}s p50: {:.3}s p90: {:.3}s \
             p99: {:.3}s",
            r.completed_count,
            self.issued,
            r.concurrency,
            r.mean_latency,
            r.p50_latency,
            r.p90_latency,
            r.p99_latency
        )?;
        if let Some(ttft) = r.mean_ttft {
            write!(f, " ttft: {:.3}s", ttft)?;
        }
        write!(
            f,
            "  throughput req/s: {:.2}  tokens/s: {:.1}  total_tokens: {}",
            r.requests_per_second, r.tokens_per_second, r.total_tokens
        )
    }
}

/// Owns one run: warmup, timed dispatch, aggregation.
pub struct RunDriver {
    config: Arc<RunConfig>,
    issuer: Arc<dyn RequestIssuer>,
    metrics: BenchMetrics,
    sample_host: bool,
}

impl RunDriver {
    pub fn new(config: RunConfig, issuer: Arc<dyn RequestIssuer>) -> Result<Self> {
        let metrics = BenchMetrics::new()
            .map_err(|e| BenchError::Message(format!("cannot register metrics: {e}")))?;
        Ok(Self { config: Arc::new(config), issuer, metrics, sample_host: true })
    }

    pub fn with_host_sampling(mut self, enabled: bool) -> Self {
        self.sample_host = enabled;
        self
    }

    pub fn metrics(&self) -> &BenchMetrics {
        &self.metrics
    }

    /// Sequential, untimed requests; failures are logged and otherwise ignored.
    pub async fn warmup(&self) {
        let n = self.config.warmup_requests;
        if n == 0 {
            return;
        }
        tracing::info!(target: "driver", "running {} warmup requests", n);
        let mut failed = 0;
        for _ in 0..n {
            if let Err(e) = self.issuer.issue(&self.config).await {
                failed += 1;
                tracing::warn!(target: "driver", "warmup request failed: {}", e);
            }
        }
        if failed == n {
            tracing::warn!(target: "driver", "every warmup request failed; is the server up?");
        }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        self.warmup().await;

        tracing::info!(
            target: "driver",
            "benchmarking {} model={} requests={} concurrency={} stream={}",
            self.config.endpoint_url,
            self.config.model_id,
            self.config.total_requests,
            self.config.concurrency,
            self.config.stream
        );

        let sampler = self.sample_host.then(|| HostSampler::start(HOST_SAMPLE_EVERY));
        let start = Instant::now();
        let results = dispatch(self.config.clone(), self.issuer.clone(), &self.metrics).await;
        let elapsed = start.elapsed();
        let host = match sampler {
            Some(sampler) => sampler.stop().await,
            None => None,
        };

        let failures = results.failure_breakdown();
        if !failures.is_empty() {
            tracing::warn!(target: "driver", "failed requests by kind: {:?}", failures);
        }

        let report = aggregate(&results, self.config.concurrency, elapsed.as_secs_f64())?;
        Ok(RunSummary {
            report,
            issued: results.len(),
            elapsed_seconds: elapsed.as_secs_f64(),
            failures,
            host,
        })
    }
}
