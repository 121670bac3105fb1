// src/core/errors.rs

use thiserror::Error;

/// Taxonomy of errors produced by the coordination core, one variant per
/// named error code a client or an internal caller can observe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MasterError {
    #[error("operation {0} not found")]
    OperationNotFound(u64),

    #[error("operation already in progress for label '{0}'")]
    OperationInProgress(String),

    #[error("server not ready")]
    ServerNotReady,

    #[error("server shutting down")]
    ServerShuttingDown,

    #[error("operation {0} is blocked and cannot be removed")]
    OperationBlocked(u64),

    #[error("range server '{0}' is not connected")]
    ServerNotConnected(String),

    #[error("range server '{0}' is already connected")]
    ServerAlreadyConnected(String),

    #[error("no available range servers (urgent={urgent})")]
    NoAvailableServers { urgent: bool },

    #[error(
        "clock skew of {skew_us}us between master and range server '{proxy}' exceeds the configured maximum of {max_us}us"
    )]
    ClockSkewExceeded {
        proxy: String,
        skew_us: i64,
        max_us: i64,
    },

    #[error(
        "RangeServer recovery blocked ({available} servers available, quorum of {quorum} is required)"
    )]
    RecoveryQuorumNotMet { available: usize, quorum: usize },

    #[error("balance plan generation {expected} expected, found {found}")]
    StaleBalanceGeneration { expected: u64, found: u64 },

    #[error("metalog entity '{0}' failed to replay: {1}")]
    MetalogReplayFailed(String, String),

    #[error("metalog checksum mismatch in fragment '{0}'")]
    MetalogChecksumMismatch(String),

    #[error("name service error: {0}")]
    NameService(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed wire frame: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("induced failure (test-only)")]
    InducedFailure,

    #[error("io error: {0}")]
    Io(String),
}

impl MasterError {
    /// Numeric code sent back over the wire in a `MasterFrame::Error`
    /// reply; one per variant, stable across releases since clients match
    /// on it.
    pub fn code(&self) -> u32 {
        match self {
            MasterError::OperationNotFound(_) => 1,
            MasterError::OperationInProgress(_) => 2,
            MasterError::ServerNotReady => 3,
            MasterError::ServerShuttingDown => 4,
            MasterError::OperationBlocked(_) => 5,
            MasterError::ServerNotConnected(_) => 6,
            MasterError::ServerAlreadyConnected(_) => 7,
            MasterError::NoAvailableServers { .. } => 8,
            MasterError::ClockSkewExceeded { .. } => 9,
            MasterError::RecoveryQuorumNotMet { .. } => 10,
            MasterError::StaleBalanceGeneration { .. } => 11,
            MasterError::MetalogReplayFailed(_, _) => 12,
            MasterError::MetalogChecksumMismatch(_) => 13,
            MasterError::NameService(_) => 14,
            MasterError::Timeout(_) => 15,
            MasterError::Protocol(_) => 16,
            MasterError::Config(_) => 17,
            MasterError::InducedFailure => 18,
            MasterError::Io(_) => 19,
        }
    }
}

impl From<std::io::Error> for MasterError {
    fn from(e: std::io::Error) -> Self {
        MasterError::Io(e.to_string())
    }
}

impl From<config::ConfigError> for MasterError {
    fn from(e: config::ConfigError) -> Self {
        MasterError::Config(e.to_string())
    }
}

impl From<std::num::ParseIntError> for MasterError {
    fn from(e: std::num::ParseIntError) -> Self {
        MasterError::Config(e.to_string())
    }
}

pub type MasterResult<T> = Result<T, MasterError>;
