use thiserror::Error;

use crate::threshold::script::ScriptError;

// ─── Unified error type ──────────────────────────────────────────

/// Every fallible operation in the crate reports one of these.
///
/// Setup-phase variants (`InvalidStage`, `InvalidThreshold`, `VuCreation`,
/// `UnknownOutput`) abort before any worker starts. Run-phase variants are
/// logged where they occur and never cross from one VU or backend to another.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid stage spec `{spec}`: {reason}")]
    InvalidStage { spec: String, reason: String },

    #[error("threshold {index} is invalid: {source}")]
    InvalidThreshold {
        index: usize,
        #[source]
        source: ScriptError,
    },

    #[error("threshold {index} failed to evaluate: {source}")]
    ThresholdRuntime {
        index: usize,
        #[source]
        source: ScriptError,
    },

    #[error("`{metric}` {source}")]
    MetricThreshold {
        metric: String,
        #[source]
        source: Box<Error>,
    },

    #[error("couldn't create VU: {0}")]
    VuCreation(String),

    #[error("VU pool exhausted: {requested} requested, {capacity} available")]
    PoolExhausted { requested: usize, capacity: usize },

    #[error("iteration failed: {0}")]
    Iteration(String),

    #[error("Redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("backend `{backend}` rejected samples: {message}")]
    Backend { backend: String, message: String },

    #[error("no target given")]
    MissingTarget,

    #[error("unknown output destination `{0}`")]
    UnknownOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
