//! Persistence models and store traits.
//!
//! Sessions and pending transactions are owned by the storage backend; the
//! rest of the crate only holds the policy that governs their transitions.
//! The traits keep the core independent of the storage technology.

mod libsql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;

pub use self::libsql::LibSqlBackend;

/// Lifecycle of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Connected,
    Expired,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "pending" => Ok(Self::Pending),
            "connected" => Ok(Self::Connected),
            "expired" => Ok(Self::Expired),
            other => Err(DatabaseError::Serialization(format!(
                "unknown session status '{other}'"
            ))),
        }
    }
}

/// A binding between an agent conversation and a user wallet.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque actor identifier, stable per agent conversation.
    pub session_id: String,
    /// Single-use credential proving the user authorized the binding.
    pub connection_token: String,
    pub token_expiry: DateTime<Utc>,
    pub status: SessionStatus,
    /// Immutable once the session reaches `connected`.
    pub wallet_address: Option<String>,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn wallet_connected(&self) -> bool {
        self.wallet_address.is_some()
    }

    /// Whether the connection token has lapsed (lazy expiry is enforced by
    /// the session manager on every read, never by a background sweep).
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry < now
    }
}

/// Lifecycle of a proposed transfer.
///
/// Forward-only: `pending → signed → submitted → {confirmed | failed}`, with
/// `pending → expired` when the approval window lapses before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Signed,
    Submitted,
    Confirmed,
    Failed,
    Expired,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Signed => "signed",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "pending" => Ok(Self::Pending),
            "signed" => Ok(Self::Signed),
            "submitted" => Ok(Self::Submitted),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(DatabaseError::Serialization(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }

    /// Non-terminal statuses participate in duplicate suppression.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Signed | Self::Submitted)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// The directed edges of the state machine. Everything else is illegal.
    pub fn may_transition_to(self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Signed)
                | (Self::Pending, Self::Expired)
                | (Self::Signed, Self::Submitted)
                | (Self::Submitted, Self::Confirmed)
                | (Self::Submitted, Self::Failed)
        )
    }
}

/// A proposed transfer awaiting user approval and chain settlement.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub tx_id: Uuid,
    pub session_id: String,
    /// Sender address, copied from the session at creation time.
    pub wallet_address: String,
    pub recipient_address: String,
    /// Integer minor units (lamports). Never floating point.
    pub amount_lamports: u64,
    pub status: TxStatus,
    /// Serialized unsigned transaction, handed to the wallet for signing.
    pub unsigned_payload: Vec<u8>,
    /// On-chain signature, recorded at submission.
    pub signature: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn approval_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Session persistence operations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, actor_id: &str) -> Result<Option<Session>, DatabaseError>;

    async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>, DatabaseError>;

    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError>;

    async fn mark_session_expired(&self, actor_id: &str) -> Result<(), DatabaseError>;

    async fn touch_session(&self, actor_id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    /// Conditionally bind a wallet: only a `pending` session is updated.
    /// Returns `false` when the guard did not match (already used), so the
    /// pending→connected transition happens at most once even under races.
    async fn bind_wallet(
        &self,
        actor_id: &str,
        wallet_address: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;
}

/// Pending-transaction persistence operations.
#[async_trait]
pub trait PendingTxStore: Send + Sync {
    /// Insert a new record. Fails with [`DatabaseError::Constraint`] when an
    /// active record for the same `(session, recipient, amount)` tuple
    /// already exists; the storage layer is the arbiter of creation races.
    async fn insert_transaction(&self, tx: &PendingTransaction) -> Result<(), DatabaseError>;

    async fn get_transaction(&self, tx_id: Uuid)
    -> Result<Option<PendingTransaction>, DatabaseError>;

    /// The duplicate-suppression lookup: the non-terminal record for a
    /// `(session, recipient, amount)` tuple, if any.
    async fn find_active_transaction(
        &self,
        session_id: &str,
        recipient_address: &str,
        amount_lamports: u64,
    ) -> Result<Option<PendingTransaction>, DatabaseError>;

    /// Compare-and-set status transition. Returns `false` when the record was
    /// not in `from` anymore; the caller re-reads and reports the actual state.
    async fn transition_status(
        &self,
        tx_id: Uuid,
        from: TxStatus,
        to: TxStatus,
    ) -> Result<bool, DatabaseError>;

    /// CAS `signed → submitted`, recording the returned signature.
    async fn record_submission(&self, tx_id: Uuid, signature: &str)
    -> Result<bool, DatabaseError>;

    async fn list_submitted(&self) -> Result<Vec<PendingTransaction>, DatabaseError>;

    /// Flag `pending` records past their expiry as `expired`. Signed and
    /// submitted records are never touched. Returns the number flagged.
    async fn expire_stale_transactions(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

/// Unified database backend.
#[async_trait]
pub trait Database: SessionStore + PendingTxStore {
    /// Create or upgrade the schema.
    async fn migrate(&self) -> Result<(), DatabaseError>;
}
