//! libSQL backend for the Database trait.
//!
//! Embedded SQLite-compatible storage. Two modes:
//! - Local file-based (production, no server needed)
//! - In-memory (for testing)
//!
//! The duplicate-suppression invariant lives here as a partial unique index
//! over the active `(session_id, recipient_address, amount_lamports)` tuple,
//! so the database stays the arbiter of concurrent creation races.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Row};
use uuid::Uuid;

use crate::db::{
    Database, PendingTransaction, PendingTxStore, Session, SessionStatus, SessionStore, TxStatus,
};
use crate::error::DatabaseError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    connection_token TEXT NOT NULL UNIQUE,
    token_expiry TEXT NOT NULL,
    status TEXT NOT NULL,
    wallet_address TEXT,
    last_used_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_transactions (
    tx_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    wallet_address TEXT NOT NULL,
    recipient_address TEXT NOT NULL,
    amount_lamports INTEGER NOT NULL,
    status TEXT NOT NULL,
    unsigned_payload BLOB NOT NULL,
    signature TEXT,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_tx_active_tuple
    ON pending_transactions(session_id, recipient_address, amount_lamports)
    WHERE status IN ('pending', 'signed', 'submitted');

CREATE INDEX IF NOT EXISTS idx_pending_tx_status
    ON pending_transactions(status);
"#;

/// Explicit column list for the sessions table (matches positional access in
/// `row_to_session`).
const SESSION_COLUMNS: &str = "\
    session_id, connection_token, token_expiry, status, \
    wallet_address, last_used_at, created_at";

/// Explicit column list for pending_transactions (matches positional access
/// in `row_to_transaction`).
const TX_COLUMNS: &str = "\
    tx_id, session_id, wallet_address, recipient_address, amount_lamports, \
    status, unsigned_payload, signature, expires_at, created_at";

/// libSQL database backend.
pub struct LibSqlBackend {
    db: Arc<LibSqlDatabase>,
    /// Keep-alive connection for shared-cache in-memory databases. A named
    /// in-memory database is torn down once its last connection closes, so the
    /// in-memory test backend must hold one open connection for its lifetime.
    /// Unused for file-backed databases.
    _keepalive: Option<Connection>,
}

impl LibSqlBackend {
    /// Create a new local embedded database.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        Ok(Self {
            db: Arc::new(db),
            _keepalive: None,
        })
    }

    /// Create a new in-memory database (for testing).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        // Each connection opened via `connect()` re-opens the database path, and a
        // bare `:memory:` path yields a fresh private database per connection — so
        // tables created by `migrate()` would be invisible to later connections.
        // Use a uniquely-named shared-cache in-memory database so every connection
        // from this backend sees the same tables, while staying isolated from other
        // `new_memory()` instances. Requires the URI open flag (0x40 = SQLITE_OPEN_URI).
        let uri = format!("file:{}?mode=memory&cache=shared", Uuid::new_v4());
        let flags = libsql::OpenFlags::default() | libsql::OpenFlags::from_bits_retain(0x40);
        let db = libsql::Builder::new_local(uri)
            .flags(flags)
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        // Hold one connection open for the backend's lifetime so the shared-cache
        // in-memory database is not torn down between `connect()` calls.
        let keepalive = db.connect().map_err(|e| {
            DatabaseError::Connection(format!("Failed to open in-memory keep-alive connection: {e}"))
        })?;

        Ok(Self {
            db: Arc::new(db),
            _keepalive: Some(keepalive),
        })
    }

    /// Create a new connection.
    ///
    /// Sets `PRAGMA busy_timeout = 5000` so concurrent writers wait up to
    /// five seconds instead of failing instantly with "database is locked".
    async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;
        conn.query("PRAGMA busy_timeout = 5000", ())
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to set busy_timeout: {e}")))?;
        Ok(conn)
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn migrate(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.query("PRAGMA journal_mode=WAL", ())
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to enable WAL: {e}")))?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Query(format!("Schema migration failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for LibSqlBackend {
    async fn get_session(&self, actor_id: &str) -> Result<Option<Session>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
                libsql::params![actor_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE connection_token = ?1"),
                libsql::params![token],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO sessions (
                session_id, connection_token, token_expiry, status,
                wallet_address, last_used_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            libsql::params![
                session.session_id.as_str(),
                session.connection_token.as_str(),
                session.token_expiry.to_rfc3339(),
                session.status.as_str(),
                session.wallet_address.as_deref(),
                session.last_used_at.to_rfc3339(),
                session.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn mark_session_expired(&self, actor_id: &str) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "UPDATE sessions SET status = 'expired' WHERE session_id = ?1",
            libsql::params![actor_id],
        )
        .await?;
        Ok(())
    }

    async fn touch_session(&self, actor_id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "UPDATE sessions SET last_used_at = ?1 WHERE session_id = ?2",
            libsql::params![at.to_rfc3339(), actor_id],
        )
        .await?;
        Ok(())
    }

    async fn bind_wallet(
        &self,
        actor_id: &str,
        wallet_address: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE sessions
                 SET wallet_address = ?1, status = 'connected', last_used_at = ?2
                 WHERE session_id = ?3 AND status = 'pending'",
                libsql::params![wallet_address, at.to_rfc3339(), actor_id],
            )
            .await?;
        Ok(changed == 1)
    }
}

#[async_trait]
impl PendingTxStore for LibSqlBackend {
    async fn insert_transaction(&self, tx: &PendingTransaction) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO pending_transactions (
                tx_id, session_id, wallet_address, recipient_address, amount_lamports,
                status, unsigned_payload, signature, expires_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            libsql::params![
                tx.tx_id.to_string(),
                tx.session_id.as_str(),
                tx.wallet_address.as_str(),
                tx.recipient_address.as_str(),
                tx.amount_lamports as i64,
                tx.status.as_str(),
                tx.unsigned_payload.clone(),
                tx.signature.as_deref(),
                tx.expires_at.to_rfc3339(),
                tx.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_transaction(
        &self,
        tx_id: Uuid,
    ) -> Result<Option<PendingTransaction>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {TX_COLUMNS} FROM pending_transactions WHERE tx_id = ?1"),
                libsql::params![tx_id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_active_transaction(
        &self,
        session_id: &str,
        recipient_address: &str,
        amount_lamports: u64,
    ) -> Result<Option<PendingTransaction>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TX_COLUMNS} FROM pending_transactions
                     WHERE session_id = ?1
                       AND recipient_address = ?2
                       AND amount_lamports = ?3
                       AND status IN ('pending', 'signed', 'submitted')
                     ORDER BY created_at DESC
                     LIMIT 1"
                ),
                libsql::params![session_id, recipient_address, amount_lamports as i64],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn transition_status(
        &self,
        tx_id: Uuid,
        from: TxStatus,
        to: TxStatus,
    ) -> Result<bool, DatabaseError> {
        debug_assert!(from.may_transition_to(to));

        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE pending_transactions SET status = ?1 WHERE tx_id = ?2 AND status = ?3",
                libsql::params![to.as_str(), tx_id.to_string(), from.as_str()],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn record_submission(
        &self,
        tx_id: Uuid,
        signature: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE pending_transactions
                 SET status = 'submitted', signature = ?1
                 WHERE tx_id = ?2 AND status = 'signed'",
                libsql::params![signature, tx_id.to_string()],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn list_submitted(&self) -> Result<Vec<PendingTransaction>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TX_COLUMNS} FROM pending_transactions
                     WHERE status = 'submitted'
                     ORDER BY created_at ASC"
                ),
                (),
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_transaction(&row)?);
        }
        Ok(out)
    }

    async fn expire_stale_transactions(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE pending_transactions
                 SET status = 'expired'
                 WHERE status = 'pending' AND expires_at < ?1",
                libsql::params![now.to_rfc3339()],
            )
            .await?;
        Ok(changed)
    }
}

fn row_to_session(row: &Row) -> Result<Session, DatabaseError> {
    Ok(Session {
        session_id: get_text(row, 0)?,
        connection_token: get_text(row, 1)?,
        token_expiry: get_datetime(row, 2)?,
        status: SessionStatus::parse(&get_text(row, 3)?)?,
        wallet_address: row.get::<String>(4).ok(),
        last_used_at: get_datetime(row, 5)?,
        created_at: get_datetime(row, 6)?,
    })
}

fn row_to_transaction(row: &Row) -> Result<PendingTransaction, DatabaseError> {
    let tx_id = get_text(row, 0)?;
    let tx_id = Uuid::parse_str(&tx_id)
        .map_err(|e| DatabaseError::Serialization(format!("bad tx_id '{tx_id}': {e}")))?;

    Ok(PendingTransaction {
        tx_id,
        session_id: get_text(row, 1)?,
        wallet_address: get_text(row, 2)?,
        recipient_address: get_text(row, 3)?,
        amount_lamports: row
            .get::<i64>(4)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))? as u64,
        status: TxStatus::parse(&get_text(row, 5)?)?,
        unsigned_payload: row
            .get::<Vec<u8>>(6)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        signature: row.get::<String>(7).ok(),
        expires_at: get_datetime(row, 8)?,
        created_at: get_datetime(row, 9)?,
    })
}

fn get_text(row: &Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Serialization(format!("column {idx}: {e}")))
}

fn get_datetime(row: &Row, idx: i32) -> Result<DateTime<Utc>, DatabaseError> {
    let text = get_text(row, idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp '{text}': {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    async fn backend() -> LibSqlBackend {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        backend.migrate().await.unwrap();
        backend
    }

    fn session(actor: &str, token: &str) -> Session {
        let now = Utc::now();
        Session {
            session_id: actor.to_string(),
            connection_token: token.to_string(),
            token_expiry: now + Duration::minutes(10),
            status: SessionStatus::Pending,
            wallet_address: None,
            last_used_at: now,
            created_at: now,
        }
    }

    fn transfer(session_id: &str, recipient: &str, lamports: u64) -> PendingTransaction {
        let now = Utc::now();
        PendingTransaction {
            tx_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            wallet_address: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
            recipient_address: recipient.to_string(),
            amount_lamports: lamports,
            status: TxStatus::Pending,
            unsigned_payload: vec![1, 2, 3],
            signature: None,
            expires_at: now + Duration::minutes(15),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn session_round_trips_including_null_wallet() {
        let backend = backend().await;
        backend.insert_session(&session("actor-1", "tok-1")).await.unwrap();

        let loaded = backend.get_session("actor-1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "actor-1");
        assert_eq!(loaded.status, SessionStatus::Pending);
        assert!(loaded.wallet_address.is_none());

        let by_token = backend.get_session_by_token("tok-1").await.unwrap().unwrap();
        assert_eq!(by_token.session_id, "actor-1");
    }

    #[tokio::test]
    async fn connection_tokens_are_globally_unique() {
        let backend = backend().await;
        backend.insert_session(&session("actor-1", "tok-dup")).await.unwrap();

        let err = backend
            .insert_session(&session("actor-2", "tok-dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn bind_wallet_fires_at_most_once() {
        let backend = backend().await;
        backend.insert_session(&session("actor-1", "tok-1")).await.unwrap();

        let now = Utc::now();
        assert!(backend.bind_wallet("actor-1", "WalletA", now).await.unwrap());
        // Second attempt hits the status guard.
        assert!(!backend.bind_wallet("actor-1", "WalletB", now).await.unwrap());

        let loaded = backend.get_session("actor-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Connected);
        assert_eq!(loaded.wallet_address.as_deref(), Some("WalletA"));
    }

    #[tokio::test]
    async fn active_tuple_is_unique_until_terminal() {
        let backend = backend().await;
        let first = transfer("s1", "RecipientAAA", 1_500_000_000);
        backend.insert_transaction(&first).await.unwrap();

        // A second active record for the same tuple violates the index.
        let dup = transfer("s1", "RecipientAAA", 1_500_000_000);
        let err = backend.insert_transaction(&dup).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        // Different amount is a different tuple.
        backend
            .insert_transaction(&transfer("s1", "RecipientAAA", 2_000_000_000))
            .await
            .unwrap();

        // Once the first reaches a terminal status the tuple frees up.
        assert!(
            backend
                .transition_status(first.tx_id, TxStatus::Pending, TxStatus::Expired)
                .await
                .unwrap()
        );
        backend
            .insert_transaction(&transfer("s1", "RecipientAAA", 1_500_000_000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transition_status_is_compare_and_set() {
        let backend = backend().await;
        let tx = transfer("s1", "RecipientAAA", 42);
        backend.insert_transaction(&tx).await.unwrap();

        assert!(
            backend
                .transition_status(tx.tx_id, TxStatus::Pending, TxStatus::Signed)
                .await
                .unwrap()
        );
        // Losing a race: the record is no longer pending.
        assert!(
            !backend
                .transition_status(tx.tx_id, TxStatus::Pending, TxStatus::Signed)
                .await
                .unwrap()
        );

        assert!(backend.record_submission(tx.tx_id, "sig111").await.unwrap());
        assert!(!backend.record_submission(tx.tx_id, "sig222").await.unwrap());

        let loaded = backend.get_transaction(tx.tx_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TxStatus::Submitted);
        assert_eq!(loaded.signature.as_deref(), Some("sig111"));
    }

    #[tokio::test]
    async fn file_backed_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solbridge.db");

        {
            let backend = LibSqlBackend::new_local(&path).await.unwrap();
            backend.migrate().await.unwrap();
            backend.insert_session(&session("actor-1", "tok-1")).await.unwrap();
        }

        let backend = LibSqlBackend::new_local(&path).await.unwrap();
        backend.migrate().await.unwrap();
        let loaded = backend.get_session("actor-1").await.unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn expire_sweep_only_touches_stale_pending_records() {
        let backend = backend().await;

        let mut stale = transfer("s1", "RecipientAAA", 1);
        stale.expires_at = Utc::now() - Duration::minutes(1);
        backend.insert_transaction(&stale).await.unwrap();

        let fresh = transfer("s1", "RecipientBBB", 2);
        backend.insert_transaction(&fresh).await.unwrap();

        let mut signed = transfer("s1", "RecipientCCC", 3);
        signed.expires_at = Utc::now() - Duration::minutes(1);
        backend.insert_transaction(&signed).await.unwrap();
        backend
            .transition_status(signed.tx_id, TxStatus::Pending, TxStatus::Signed)
            .await
            .unwrap();

        let flagged = backend.expire_stale_transactions(Utc::now()).await.unwrap();
        assert_eq!(flagged, 1);

        let stale = backend.get_transaction(stale.tx_id).await.unwrap().unwrap();
        assert_eq!(stale.status, TxStatus::Expired);
        let fresh = backend.get_transaction(fresh.tx_id).await.unwrap().unwrap();
        assert_eq!(fresh.status, TxStatus::Pending);
        // Past-expiry but signed: only chain truth decides now.
        let signed = backend.get_transaction(signed.tx_id).await.unwrap().unwrap();
        assert_eq!(signed.status, TxStatus::Signed);
    }
}
