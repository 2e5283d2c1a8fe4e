//! Latency percentiles and throughput over a finished run.

use chatbench_common::{BenchError, Result};
use serde::Serialize;

use crate::dispatch::RunResults;

/// p90 falls back to the max below this many samples.
pub const P90_MIN_SAMPLES: usize = 10;
/// p99 falls back to the max below this many samples.
pub const P99_MIN_SAMPLES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    /// Successful requests only; failures are not counted here.
    pub completed_count: usize,
    pub concurrency: usize,
    pub mean_latency: f64,
    pub p50_latency: f64,
    pub p90_latency: f64,
    pub p99_latency: f64,
    pub requests_per_second: f64,
    pub tokens_per_second: f64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_ttft: Option<f64>,
}

/// Summarize the successful slots of `results` over a dispatch phase lasting `elapsed_seconds`.
pub fn aggregate(
    results: &RunResults,
    concurrency: usize,
    elapsed_seconds: f64,
) -> Result<AggregateReport> {
    let mut latencies: Vec<f64> = results.successes().map(|o| o.latency_seconds).collect();
    if latencies.is_empty() {
        return Err(BenchError::InsufficientData { issued: results.len() });
    }
    latencies.sort_by(f64::total_cmp);

    let completed = latencies.len();
    let total_tokens = results.successes().map(|o| o.token_count).fold(0, u64::saturating_add);
    let ttfts: Vec<f64> = results.successes().filter_map(|o| o.ttft_seconds).collect();

    let per_second =
        |amount: f64| if elapsed_seconds > 0.0 { amount / elapsed_seconds } else { 0.0 };

    Ok(AggregateReport {
        completed_count: completed,
        concurrency,
        mean_latency: mean(&latencies),
        p50_latency: median(&latencies),
        p90_latency: p90(&latencies),
        p99_latency: p99(&latencies),
        requests_per_second: per_second(completed as f64),
        tokens_per_second: per_second(total_tokens as f64),
        total_tokens,
        mean_ttft: (!ttfts.is_empty()).then(|| mean(&ttfts)),
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Middle value; mean of the two middle values for even lengths. `sorted` must be non-empty.
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Last cut point of the exclusive-method deciles.
fn p90(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n < P90_MIN_SAMPLES {
        return max(sorted);
    }
    let m = n + 1;
    let j = 9 * m / 10;
    let delta = (9 * m - j * 10) as f64;
    (sorted[j - 1] * (10.0 - delta) + sorted[j] * delta) / 10.0
}

/// Nearest rank at `floor(0.99 * n)` (1-based).
fn p99(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n < P99_MIN_SAMPLES {
        return max(sorted);
    }
    let rank = (0.99 * n as f64) as usize;
    sorted[rank.saturating_sub(1)]
}

fn max(sorted: &[f64]) -> f64 {
    sorted[sorted.len() - 1]
}
