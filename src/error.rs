//! Error types for the trading node

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the trading node
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    // Bonding curve protocol errors
    #[error("Bonding curve decode failed: {0}")]
    CurveDecode(String),

    #[error("Quote calculation overflow")]
    QuoteOverflow,

    // Trading errors
    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    #[error("Transaction simulation failed: {0}")]
    TransactionSimulation(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    #[error("Execution rejected by risk engine: {0}")]
    RiskRejected(String),

    // Position management errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    // Store errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("KV store error: {0}")]
    Kv(String),

    // Policy errors
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Policy not found: {0}")]
    PolicyNotFound(String),

    #[error("Duplicate registration: {0}")]
    Conflict(String),

    // Reasoning service errors
    #[error("Reasoning service error: {0}")]
    Reasoning(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_)
                | Error::RpcTimeout(_)
                | Error::RpcConnection(_)
                | Error::TransactionSend(_)
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::Database("row not found".to_string()),
            other => Error::Database(other.to_string()),
        }
    }
}

// Conversion from redis errors
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Kv(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Reasoning(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
