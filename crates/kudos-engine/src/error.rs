//! Error types for the scoring engine.
//!
//! Every variant maps to a stable [`ErrorKind`]; hosts translate the kind's
//! `code()` into their own wire error codes. Display strings are diagnostic.

use thiserror::Error;

/// Stable classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidMetricConfig,
    InvalidProbabilityTable,
    InsufficientBalance,
    InsufficientGate,
    CapExceeded,
    AlreadyClaimed,
    ParticipantNotFound,
    OutcomeNotFound,
    InvalidIdempotencyKey,
    Config,
    Store,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMetricConfig => "invalid_metric_config",
            Self::InvalidProbabilityTable => "invalid_probability_table",
            Self::InsufficientBalance => "insufficient_balance",
            Self::InsufficientGate => "insufficient_gate",
            Self::CapExceeded => "cap_exceeded",
            Self::AlreadyClaimed => "already_claimed",
            Self::ParticipantNotFound => "participant_not_found",
            Self::OutcomeNotFound => "outcome_not_found",
            Self::InvalidIdempotencyKey => "invalid_idempotency_key",
            Self::Config => "config",
            Self::Store => "store",
        }
    }

    /// Configuration kinds are raised at load time and are not retryable.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidMetricConfig | Self::InvalidProbabilityTable | Self::Config
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid metric config for '{key}': {reason}")]
    InvalidMetricConfig { key: String, reason: String },

    #[error("invalid probability table: {0}")]
    InvalidProbabilityTable(String),

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error("reward mechanism '{0}' is locked")]
    InsufficientGate(String),

    #[error("{window} cap exceeded: issued {issued} + proposed {proposed} > cap {cap}")]
    CapExceeded {
        window: String,
        cap: u64,
        issued: u64,
        proposed: u64,
    },

    #[error("outcome {0} already claimed")]
    AlreadyClaimed(String),

    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("reward outcome not found: {0}")]
    OutcomeNotFound(String),

    #[error("idempotency key '{0}' is empty or uses a reserved prefix")]
    InvalidIdempotencyKey(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidMetricConfig { .. } => ErrorKind::InvalidMetricConfig,
            EngineError::InvalidProbabilityTable(_) => ErrorKind::InvalidProbabilityTable,
            EngineError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            EngineError::InsufficientGate(_) => ErrorKind::InsufficientGate,
            EngineError::CapExceeded { .. } => ErrorKind::CapExceeded,
            EngineError::AlreadyClaimed(_) => ErrorKind::AlreadyClaimed,
            EngineError::ParticipantNotFound(_) => ErrorKind::ParticipantNotFound,
            EngineError::OutcomeNotFound(_) => ErrorKind::OutcomeNotFound,
            EngineError::InvalidIdempotencyKey(_) => ErrorKind::InvalidIdempotencyKey,
            EngineError::Config(_) | EngineError::Toml(_) => ErrorKind::Config,
            EngineError::Store(_) | EngineError::Io(_) | EngineError::Json(_) => ErrorKind::Store,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    pub fn is_config(&self) -> bool {
        self.kind().is_config()
    }

    pub(crate) fn metric(key: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidMetricConfig {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
