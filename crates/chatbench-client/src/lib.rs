//! Request issuers: one chat-completion call in, one outcome (or failure) out.

pub mod http;
pub mod sse;
pub mod wire;

use async_trait::async_trait;
use chatbench_common::{RequestFailure, RequestOutcome, RunConfig};

pub use http::{fetch_model_ids, HttpIssuer};

/// Sends exactly one request per call and never retries.
#[async_trait]
pub trait RequestIssuer: Send + Sync {
    async fn issue(&self, config: &RunConfig) -> Result<RequestOutcome, RequestFailure>;
}

#[cfg(feature = "mock")]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers from a fixed script, cycling by call number, and counts invocations.
    pub struct ScriptedIssuer {
        script: Vec<Result<RequestOutcome, RequestFailure>>,
        delay: Duration,
        panic_on: Option<usize>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: Mutex<usize>,
    }

    impl ScriptedIssuer {
        pub fn new(script: Vec<Result<RequestOutcome, RequestFailure>>) -> Self {
            assert!(!script.is_empty(), "script needs at least one entry");
            Self {
                script,
                delay: Duration::ZERO,
                panic_on: None,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: Mutex::new(0),
            }
        }

        /// Every call succeeds with the given latency and token count.
        pub fn always_ok(latency_seconds: f64, tokens: u64) -> Self {
            Self::new(vec![Ok(RequestOutcome::new(latency_seconds, tokens, "scripted"))])
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Panic instead of answering on the given call number (0-based).
        pub fn panic_on_call(mut self, call: usize) -> Self {
            self.panic_on = Some(call);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Highest number of calls observed running at once.
        pub fn max_in_flight(&self) -> usize {
            *self.max_in_flight.lock().unwrap_or_else(|p| p.into_inner())
        }
    }

    #[async_trait]
    impl RequestIssuer for ScriptedIssuer {
        async fn issue(&self, _config: &RunConfig) -> Result<RequestOutcome, RequestFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            {
                let mut max = self.max_in_flight.lock().unwrap_or_else(|p| p.into_inner());
                *max = (*max).max(now);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.panic_on == Some(call) {
                panic!("scripted panic on call {call}");
            }
            self.script[call % self.script.len()].clone()
        }
    }
}
