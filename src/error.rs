//! Error types for solbridge.

use serde::Serialize;
use uuid::Uuid;

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<libsql::Error> for DatabaseError {
    fn from(err: libsql::Error) -> Self {
        let message = err.to_string();
        if message.to_lowercase().contains("unique") {
            DatabaseError::Constraint(message)
        } else {
            DatabaseError::Query(message)
        }
    }
}

/// Session and wallet-binding errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found for actor {actor_id}")]
    NotFound { actor_id: String },

    #[error("Session for actor {actor_id} is expired")]
    Expired { actor_id: String },

    #[error("Connection token expired")]
    TokenExpired,

    #[error("Connection token already used")]
    TokenAlreadyUsed,

    #[error("Invalid connection token")]
    InvalidToken,

    #[error("No wallet connected for this session")]
    WalletNotConnected,
}

/// Transfer-construction errors.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Invalid Solana address for {field}: {reason}")]
    InvalidAddress { field: &'static str, reason: String },

    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error(
        "Insufficient balance: required {required_lamports} lamports (amount + fee), \
         available {available_lamports}"
    )]
    InsufficientBalance {
        required_lamports: u64,
        available_lamports: u64,
    },

    #[error("Failed to build transaction: {0}")]
    BuildFailed(String),
}

/// Pending-transaction state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Transaction {tx_id} not found")]
    NotFound { tx_id: Uuid },

    #[error("Transaction {tx_id} already processed (status: {status})")]
    AlreadyProcessed { tx_id: Uuid, status: String },

    #[error("Transaction {tx_id} expired before signing")]
    Expired { tx_id: Uuid },

    #[error("Signed wallet does not match transaction sender")]
    SignerMismatch,

    #[error("Malformed signed transaction payload: {0}")]
    MalformedPayload(String),
}

/// Ledger RPC errors.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Solana RPC unavailable for {op} after {attempts} attempts: {reason}")]
    Unavailable {
        op: &'static str,
        attempts: u32,
        reason: String,
    },

    #[error("Solana RPC rejected {op}: {reason}")]
    Rejected { op: &'static str, reason: String },
}

/// Rate limiting errors.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Too many {label} requests. Please wait and try again.")]
    Exceeded { label: &'static str },
}

/// Structured agent-facing error payload.
///
/// Tool handlers never surface raw internal errors to the agent channel;
/// every failure is mapped through this envelope so the message stays
/// user-readable and internals stay internal.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentErrorPayload {
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl AgentErrorPayload {
    fn new(code: &'static str, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            code,
            retryable,
            message: message.into(),
        }
    }
}

impl Error {
    /// Map an error into the structured agent-facing surface.
    ///
    /// Validation and state-guard failures surface verbatim; anything the
    /// agent cannot act on collapses into a generic retry hint.
    pub fn to_agent_payload(&self) -> AgentErrorPayload {
        match self {
            Self::RateLimit(err) => {
                AgentErrorPayload::new("rate_limit.exceeded", true, err.to_string())
            }
            Self::Session(err) => match err {
                SessionError::NotFound { .. } => {
                    AgentErrorPayload::new("session.not_found", false, err.to_string())
                }
                SessionError::Expired { .. } => {
                    AgentErrorPayload::new("session.expired", false, err.to_string())
                }
                SessionError::TokenExpired => AgentErrorPayload::new(
                    "session.token_expired",
                    false,
                    "Your connection link expired. Request a new one and reconnect your wallet.",
                ),
                SessionError::TokenAlreadyUsed => {
                    AgentErrorPayload::new("session.token_already_used", false, err.to_string())
                }
                SessionError::InvalidToken => {
                    AgentErrorPayload::new("session.invalid_token", false, err.to_string())
                }
                SessionError::WalletNotConnected => AgentErrorPayload::new(
                    "session.wallet_not_connected",
                    false,
                    "Please connect your wallet before making a transfer.",
                ),
            },
            Self::Transfer(err) => match err {
                TransferError::InvalidAddress { .. } => {
                    AgentErrorPayload::new("transfer.invalid_address", false, err.to_string())
                }
                TransferError::InvalidAmount { .. } => {
                    AgentErrorPayload::new("transfer.invalid_amount", false, err.to_string())
                }
                TransferError::InsufficientBalance { .. } => {
                    AgentErrorPayload::new("transfer.insufficient_balance", false, err.to_string())
                }
                TransferError::BuildFailed(_) => AgentErrorPayload::new(
                    "transfer.build_failed",
                    true,
                    "Failed to build the transaction. Please try again.",
                ),
            },
            Self::Transaction(err) => match err {
                TransactionError::NotFound { .. } => {
                    AgentErrorPayload::new("transaction.not_found", false, err.to_string())
                }
                TransactionError::AlreadyProcessed { .. } => {
                    AgentErrorPayload::new("transaction.already_processed", false, err.to_string())
                }
                TransactionError::Expired { .. } => {
                    AgentErrorPayload::new("transaction.expired", false, err.to_string())
                }
                TransactionError::SignerMismatch => {
                    AgentErrorPayload::new("transaction.signer_mismatch", false, err.to_string())
                }
                TransactionError::MalformedPayload(_) => {
                    AgentErrorPayload::new("transaction.malformed_payload", false, err.to_string())
                }
            },
            Self::Rpc(_) => AgentErrorPayload::new(
                "rpc.unavailable",
                true,
                "The Solana network is temporarily unavailable. Please try again shortly.",
            ),
            Self::Config(_) | Self::Database(_) => AgentErrorPayload::new(
                "internal",
                true,
                "Something went wrong on our side. Please try again.",
            ),
        }
    }
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_guard_errors_surface_verbatim() {
        let err = Error::from(TransactionError::SignerMismatch);
        let payload = err.to_agent_payload();

        assert_eq!(payload.code, "transaction.signer_mismatch");
        assert!(!payload.retryable);
        assert_eq!(
            payload.message,
            "Signed wallet does not match transaction sender"
        );
    }

    #[test]
    fn rate_limit_denials_carry_the_operation_label() {
        let err = Error::from(RateLimitError::Exceeded { label: "transfer" });
        let payload = err.to_agent_payload();

        assert_eq!(payload.code, "rate_limit.exceeded");
        assert!(payload.retryable);
        assert!(payload.message.contains("transfer"));
    }

    #[test]
    fn internal_failures_never_leak_details() {
        let err = Error::from(DatabaseError::Query(
            "UNIQUE constraint failed: sessions.connection_token".to_string(),
        ));
        let payload = err.to_agent_payload();

        assert_eq!(payload.code, "internal");
        assert!(!payload.message.contains("UNIQUE"));
    }

    #[test]
    fn rpc_exhaustion_is_retryable_and_generic() {
        let err = Error::from(RpcError::Unavailable {
            op: "getLatestBlockhash",
            attempts: 4,
            reason: "connection refused".to_string(),
        });
        let payload = err.to_agent_payload();

        assert_eq!(payload.code, "rpc.unavailable");
        assert!(payload.retryable);
        assert!(!payload.message.contains("connection refused"));
    }
}
