//! Service wiring.
//!
//! Builds the object graph once at startup; every frontend (HTTP gateway,
//! MCP stdio server, background worker) shares the same services.

use std::sync::Arc;

use crate::config::Config;
use crate::db::{Database, LibSqlBackend};
use crate::error::Result;
use crate::security::RateLimiter;
use crate::session::SessionManager;
use crate::solana::gateway::{LedgerRpc, RpcGateway};
use crate::transactions::TransferAuthorizer;

/// Shared service handles.
pub struct Services {
    pub config: Config,
    pub store: Arc<dyn Database>,
    pub ledger: Arc<dyn LedgerRpc>,
    pub sessions: SessionManager,
    pub authorizer: Arc<TransferAuthorizer>,
    pub limiter: RateLimiter,
}

impl Services {
    /// Open the database, connect the gateway, and wire everything up.
    pub async fn from_config(config: Config) -> Result<Arc<Self>> {
        let backend = LibSqlBackend::new_local(&config.database.path).await?;
        backend.migrate().await?;
        let store: Arc<dyn Database> = Arc::new(backend);

        let ledger: Arc<dyn LedgerRpc> = Arc::new(RpcGateway::new(
            config.solana.rpc_url.clone(),
            config.solana.commitment,
        ));

        Ok(Self::assemble(config, store, ledger))
    }

    /// Wire services over explicit store/ledger implementations. Tests use
    /// the in-memory backend and a scripted ledger here.
    pub fn assemble(
        config: Config,
        store: Arc<dyn Database>,
        ledger: Arc<dyn LedgerRpc>,
    ) -> Arc<Self> {
        let sessions = SessionManager::new(Arc::clone(&store), config.links.clone());
        let authorizer = Arc::new(TransferAuthorizer::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
        ));

        Arc::new(Self {
            config,
            store,
            ledger,
            sessions,
            authorizer,
            limiter: RateLimiter::new(),
        })
    }
}
