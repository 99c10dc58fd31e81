//! Session management and wallet binding.
//!
//! A session binds an opaque agent actor to a user wallet through a
//! single-use connection token. Token expiry is enforced lazily, as a guard
//! clause on every read; there is no background sweep, so a stale token can
//! never win a race against one.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::{Rng, distributions::Alphanumeric};

use crate::config::LinkConfig;
use crate::db::{Database, Session, SessionStatus, SessionStore};
use crate::error::{Error, Result, SessionError};
use crate::solana::parse_wallet_address;

/// Lifetime of a connection token, in minutes.
const TOKEN_EXPIRY_MINUTES: i64 = 10;

const TOKEN_LENGTH: usize = 32;

/// A session that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub session: Session,
    pub wallet_connected: bool,
}

/// Issues connection tokens and performs the one-time wallet binding.
///
/// Sessions are always resolved per actor; there is deliberately no
/// "most recently connected session" lookup, which would be unsafe under
/// concurrent bindings.
pub struct SessionManager {
    store: Arc<dyn Database>,
    links: LinkConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Database>, links: LinkConfig) -> Self {
        Self { store, links }
    }

    /// Get or create the session for an actor. Idempotent: an existing
    /// session is returned unchanged, whatever its status.
    pub async fn create_session(&self, actor_id: &str) -> Result<Session> {
        if let Some(existing) = self.store.get_session(actor_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let session = Session {
            session_id: actor_id.to_string(),
            connection_token: generate_token(),
            token_expiry: now + Duration::minutes(TOKEN_EXPIRY_MINUTES),
            status: SessionStatus::Pending,
            wallet_address: None,
            last_used_at: now,
            created_at: now,
        };

        match self.store.insert_session(&session).await {
            Ok(()) => {
                tracing::info!(actor_id, "session created");
                Ok(session)
            }
            // Lost a creation race: converge to the winner's session.
            Err(crate::error::DatabaseError::Constraint(_)) => {
                match self.store.get_session(actor_id).await? {
                    Some(existing) => Ok(existing),
                    None => Err(SessionError::NotFound {
                        actor_id: actor_id.to_string(),
                    }
                    .into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Validate the actor's session for use.
    ///
    /// A `pending` session whose token lapsed is transitioned to `expired`
    /// (persisted) before the failure is reported, so no later read can
    /// trust the stale token.
    pub async fn validate_session(&self, actor_id: &str) -> Result<ValidatedSession> {
        let session = self
            .store
            .get_session(actor_id)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                actor_id: actor_id.to_string(),
            })?;

        if session.status == SessionStatus::Expired {
            return Err(SessionError::Expired {
                actor_id: actor_id.to_string(),
            }
            .into());
        }

        let now = Utc::now();
        if session.status == SessionStatus::Pending && session.token_expired(now) {
            self.store.mark_session_expired(actor_id).await?;
            return Err(SessionError::TokenExpired.into());
        }

        self.store.touch_session(actor_id, now).await?;

        let wallet_connected = session.wallet_connected();
        Ok(ValidatedSession {
            session,
            wallet_connected,
        })
    }

    /// Bind a wallet to the session owning `token`.
    ///
    /// The token is the sole proof of user intent, and the status guard on
    /// the conditional update makes the pending→connected transition fire at
    /// most once; afterwards the wallet address is immutable.
    pub async fn link_wallet(&self, token: &str, wallet_address: &str) -> Result<Session> {
        let session = self
            .store
            .get_session_by_token(token)
            .await?
            .ok_or(SessionError::InvalidToken)?;

        if session.status != SessionStatus::Pending {
            return Err(SessionError::TokenAlreadyUsed.into());
        }

        let now = Utc::now();
        if session.token_expired(now) {
            self.store.mark_session_expired(&session.session_id).await?;
            return Err(SessionError::TokenExpired.into());
        }

        // The only place an external, user-supplied wallet address enters
        // the system: it must at least be a real on-curve pubkey.
        parse_wallet_address("wallet", wallet_address)?;

        let bound = self
            .store
            .bind_wallet(&session.session_id, wallet_address, now)
            .await?;
        if !bound {
            // A concurrent call won the guard.
            return Err(SessionError::TokenAlreadyUsed.into());
        }

        tracing::info!(actor_id = %session.session_id, "wallet linked");

        self.store
            .get_session(&session.session_id)
            .await?
            .ok_or_else(|| {
                Error::Session(SessionError::NotFound {
                    actor_id: session.session_id.clone(),
                })
            })
    }

    /// User-facing URL for binding a wallet with `token`. Pure formatting.
    pub fn build_connection_url(&self, token: &str) -> String {
        self.links.connect_url(token)
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use solana_sdk::signature::{Keypair, Signer};

    use super::*;
    use crate::db::LibSqlBackend;
    use crate::error::TransferError;

    async fn manager() -> SessionManager {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        backend.migrate().await.unwrap();
        SessionManager::new(
            Arc::new(backend),
            LinkConfig {
                frontend_url: "https://wallet.example.com".to_string(),
            },
        )
    }

    fn wallet() -> String {
        Keypair::new().pubkey().to_string()
    }

    #[tokio::test]
    async fn create_session_is_idempotent() {
        let manager = manager().await;

        let first = manager.create_session("actor-1").await.unwrap();
        let second = manager.create_session("actor-1").await.unwrap();

        assert_eq!(first.connection_token, second.connection_token);
        assert_eq!(first.status, SessionStatus::Pending);
        assert_eq!(first.connection_token.len(), TOKEN_LENGTH);
    }

    #[tokio::test]
    async fn validate_reports_missing_sessions() {
        let manager = manager().await;
        let err = manager.validate_session("nobody").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn lazy_expiry_is_persisted_before_failing() {
        let manager = manager().await;
        let session = manager.create_session("actor-1").await.unwrap();

        // Age the token past its expiry directly in the store.
        let mut stale = session.clone();
        stale.session_id = "actor-2".to_string();
        stale.connection_token = "tok-stale-0123456789abcdef0123456".to_string();
        stale.token_expiry = Utc::now() - Duration::minutes(1);
        manager.store.insert_session(&stale).await.unwrap();

        let err = manager.validate_session("actor-2").await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::TokenExpired)));

        // The transition was persisted: the next read observes `expired`.
        let err = manager.validate_session("actor-2").await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::Expired { .. })));
    }

    #[tokio::test]
    async fn link_wallet_binds_once_and_only_once() {
        let manager = manager().await;
        let session = manager.create_session("actor-1").await.unwrap();
        let address = wallet();

        let linked = manager
            .link_wallet(&session.connection_token, &address)
            .await
            .unwrap();
        assert_eq!(linked.status, SessionStatus::Connected);
        assert_eq!(linked.wallet_address.as_deref(), Some(address.as_str()));

        // The token is spent: a second attempt always fails.
        let err = manager
            .link_wallet(&session.connection_token, &wallet())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::TokenAlreadyUsed)
        ));

        // And the bound wallet did not change.
        let validated = manager.validate_session("actor-1").await.unwrap();
        assert!(validated.wallet_connected);
        assert_eq!(
            validated.session.wallet_address.as_deref(),
            Some(address.as_str())
        );
    }

    #[tokio::test]
    async fn link_wallet_rejects_unknown_and_expired_tokens() {
        let manager = manager().await;

        let err = manager.link_wallet("no-such-token", &wallet()).await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::InvalidToken)));

        let session = manager.create_session("actor-1").await.unwrap();
        let mut stale = session.clone();
        stale.session_id = "actor-2".to_string();
        stale.connection_token = "tok-stale-0123456789abcdef0123456".to_string();
        stale.token_expiry = Utc::now() - Duration::minutes(1);
        manager.store.insert_session(&stale).await.unwrap();

        let err = manager
            .link_wallet(&stale.connection_token, &wallet())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::TokenExpired)));

        // The expiry was persisted on the way out.
        let reloaded = manager.store.get_session("actor-2").await.unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn link_wallet_rejects_malformed_addresses() {
        let manager = manager().await;
        let session = manager.create_session("actor-1").await.unwrap();

        let err = manager
            .link_wallet(&session.connection_token, "definitely-not-a-pubkey")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transfer(TransferError::InvalidAddress { .. })
        ));

        // The token survives a failed binding attempt.
        let linked = manager
            .link_wallet(&session.connection_token, &wallet())
            .await;
        assert!(linked.is_ok());
    }

    #[tokio::test]
    async fn connection_url_embeds_the_token() {
        let manager = manager().await;
        let url = manager.build_connection_url("tok123");
        assert_eq!(url, "https://wallet.example.com/connect?token=tok123");
    }
}
