pub mod config;
pub mod outcome;

pub use config::{BenchConfig, RunConfig};
pub use outcome::RequestOutcome;

pub type Result<T> = core::result::Result<T, BenchError>;

#[derive(thiserror::Error, Debug)]
pub enum BenchError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("0/{issued} requests succeeded")]
    InsufficientData { issued: usize },
    #[error("{0}")]
    Message(String),
}

/// Why a single request produced no usable sample.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestFailure {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    #[error("worker exited before recording a result")]
    Aborted,
}

impl RequestFailure {
    /// Stable label used for failure breakdowns and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestFailure::Transport(_) => "transport",
            RequestFailure::Timeout => "timeout",
            RequestFailure::Status { .. } => "status",
            RequestFailure::MalformedBody(_) => "malformed_body",
            RequestFailure::Aborted => "aborted",
        }
    }
}
