//! Fixed pool of C workers that together issue exactly N requests.
//!
//! Workers pull greedily: each claims the next reservation index from a shared
//! counter, issues one request outside any lock, and writes the result into the
//! slot with that index. Slots are write-once and index-disjoint, so the counter
//! is the only contended state.
//!
//! Each request runs in its own task. A request that panics fills its slot with
//! [`RequestFailure::Aborted`] and its worker moves on to the next reservation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use chatbench_client::RequestIssuer;
use chatbench_common::{RequestFailure, RequestOutcome, RunConfig};
use chatbench_obs::BenchMetrics;
use tokio::task::JoinSet;

/// Hands out indices `0..limit`, each exactly once.
pub struct ReservationCounter {
    next: AtomicUsize,
    limit: usize,
}

impl ReservationCounter {
    pub fn new(limit: usize) -> Self {
        Self { next: AtomicUsize::new(0), limit }
    }

    /// `None` once all `limit` reservations are gone. The counter never moves past `limit`.
    pub fn try_claim(&self) -> Option<usize> {
        loop {
            let current = self.next.load(Ordering::Relaxed);
            if current >= self.limit {
                return None;
            }
            if self
                .next
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current);
            }
        }
    }

    pub fn granted(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Completed(RequestOutcome),
    Failed(RequestFailure),
}

impl Slot {
    pub fn outcome(&self) -> Option<&RequestOutcome> {
        match self {
            Slot::Completed(outcome) => Some(outcome),
            Slot::Failed(_) => None,
        }
    }
}

impl From<Result<RequestOutcome, RequestFailure>> for Slot {
    fn from(result: Result<RequestOutcome, RequestFailure>) -> Self {
        match result {
            Ok(outcome) => Slot::Completed(outcome),
            Err(failure) => Slot::Failed(failure),
        }
    }
}

/// One slot per reservation, in reservation order.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResults {
    slots: Vec<Slot>,
}

impl RunResults {
    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn successes(&self) -> impl Iterator<Item = &RequestOutcome> {
        self.slots.iter().filter_map(Slot::outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RequestFailure> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Failed(failure) => Some(failure),
            Slot::Completed(_) => None,
        })
    }

    /// Failure count per [`RequestFailure::kind`].
    pub fn failure_breakdown(&self) -> BTreeMap<String, usize> {
        let mut breakdown = BTreeMap::new();
        for failure in self.failures() {
            *breakdown.entry(failure.kind().to_string()).or_insert(0) += 1;
        }
        breakdown
    }
}

/// Run `min(C, N)` workers until `config.total_requests` reservations are used up.
pub async fn dispatch(
    config: Arc<RunConfig>,
    issuer: Arc<dyn RequestIssuer>,
    metrics: &BenchMetrics,
) -> RunResults {
    let total = config.total_requests;
    let counter = Arc::new(ReservationCounter::new(total));
    let cells: Arc<Vec<OnceLock<Slot>>> = Arc::new((0..total).map(|_| OnceLock::new()).collect());

    let worker_count = config.effective_workers();
    tracing::debug!(
        target: "dispatch",
        "starting {} workers for {} requests",
        worker_count,
        total
    );

    let mut workers = JoinSet::new();
    for worker in 0..worker_count {
        let config = config.clone();
        let issuer = issuer.clone();
        let counter = counter.clone();
        let cells = cells.clone();
        let metrics = metrics.clone();
        workers.spawn(async move {
            run_worker(worker, config, issuer, &counter, &cells, &metrics).await
        });
    }

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((worker, issued)) => {
                tracing::trace!(target: "dispatch", "worker {} issued {} requests", worker, issued)
            }
            Err(e) => tracing::error!(target: "dispatch", "worker terminated abnormally: {}", e),
        }
    }

    tracing::debug!(target: "dispatch", "{} reservations granted", counter.granted());

    let cells = Arc::try_unwrap(cells).unwrap_or_else(|shared| (*shared).clone());
    collect_slots(cells)
}

/// A cell nobody wrote to becomes an `Aborted` failure.
fn collect_slots(cells: Vec<OnceLock<Slot>>) -> RunResults {
    let slots = cells
        .into_iter()
        .map(|cell| cell.into_inner().unwrap_or(Slot::Failed(RequestFailure::Aborted)))
        .collect();
    RunResults::from_slots(slots)
}

async fn run_worker(
    worker: usize,
    config: Arc<RunConfig>,
    issuer: Arc<dyn RequestIssuer>,
    counter: &ReservationCounter,
    cells: &[OnceLock<Slot>],
    metrics: &BenchMetrics,
) -> (usize, usize) {
    let mut issued = 0;
    while let Some(index) = counter.try_claim() {
        issued += 1;
        metrics.request_started();
        let request = {
            let config = config.clone();
            let issuer = issuer.clone();
            tokio::spawn(async move { issuer.issue(&config).await })
        };
        let result = match request.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(target: "dispatch", "#{} aborted: {}", index, e);
                Err(RequestFailure::Aborted)
            }
        };
        match &result {
            Ok(outcome) => {
                metrics.request_succeeded(outcome.latency_seconds, outcome.token_count);
                tracing::debug!(
                    target: "dispatch",
                    "#{} done in {:.3}s ({} tokens, id {:?})",
                    index,
                    outcome.latency_seconds,
                    outcome.token_count,
                    outcome.response_id
                );
            }
            Err(failure) => {
                metrics.request_failed(failure.kind());
                tracing::warn!(target: "dispatch", "#{} failed: {}", index, failure);
            }
        }
        if cells[index].set(Slot::from(result)).is_err() {
            tracing::error!(target: "dispatch", "slot {} written twice", index);
        }
    }
    (worker, issued)
}
