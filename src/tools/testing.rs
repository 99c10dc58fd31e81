//! Shared fixtures for tool tests.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;
use uuid::Uuid;

use crate::bootstrap::Services;
use crate::config::{Config, DatabaseConfig, GatewayConfig, LinkConfig, SolanaConfig};
use crate::db::{Database, LibSqlBackend};
use crate::solana::gateway::LedgerRpc;
use crate::solana::gateway::testing::ScriptedLedger;
use crate::tools::ToolContext;

pub(crate) struct TestBed {
    pub ctx: ToolContext,
    pub ledger: Arc<ScriptedLedger>,
    pub wallet: Keypair,
    pub wallet_address: String,
}

fn test_config() -> Config {
    Config {
        database: DatabaseConfig {
            path: ":memory:".into(),
        },
        solana: SolanaConfig {
            rpc_url: "http://localhost:8899".to_string(),
            commitment: CommitmentConfig::confirmed(),
        },
        gateway: GatewayConfig {
            bind_addr: "127.0.0.1:0".to_string(),
        },
        links: LinkConfig {
            frontend_url: "https://wallet.example.com".to_string(),
        },
    }
}

/// Fresh actor with no session yet.
pub(crate) async fn unbound() -> TestBed {
    let backend = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    backend.migrate().await.unwrap();

    let ledger = Arc::new(ScriptedLedger::rich());
    let services = Services::assemble(
        test_config(),
        backend as Arc<dyn Database>,
        Arc::clone(&ledger) as Arc<dyn LedgerRpc>,
    );

    let wallet = Keypair::new();
    let wallet_address = wallet.pubkey().to_string();
    TestBed {
        ctx: ToolContext {
            actor_id: format!("actor-{}", Uuid::new_v4()),
            services,
        },
        ledger,
        wallet,
        wallet_address,
    }
}

/// Actor whose session is already bound to a funded wallet.
pub(crate) async fn bound() -> TestBed {
    let bed = unbound().await;
    let session = bed
        .ctx
        .services
        .sessions
        .create_session(&bed.ctx.actor_id)
        .await
        .unwrap();
    bed.ctx
        .services
        .sessions
        .link_wallet(&session.connection_token, &bed.wallet_address)
        .await
        .unwrap();
    bed
}

pub(crate) fn recipient() -> String {
    Keypair::new().pubkey().to_string()
}

/// Drive one transfer through create → sign → submit, returning its id.
pub(crate) async fn submitted_transfer(bed: &TestBed) -> Uuid {
    let session = bed
        .ctx
        .services
        .sessions
        .validate_session(&bed.ctx.actor_id)
        .await
        .unwrap()
        .session;

    let created = bed
        .ctx
        .services
        .authorizer
        .create_transfer(&session, &recipient(), rust_decimal_macros::dec!(1), None)
        .await
        .unwrap();
    let tx_id = created.record().tx_id;

    let mut tx: Transaction = bincode::deserialize(&created.record().unsigned_payload).unwrap();
    let blockhash = tx.message.recent_blockhash;
    tx.sign(&[&bed.wallet], blockhash);
    let payload = BASE64.encode(bincode::serialize(&tx).unwrap());

    let (_, signed) = bed
        .ctx
        .services
        .authorizer
        .attach_signed(tx_id, &payload)
        .await
        .unwrap();
    bed.ctx
        .services
        .authorizer
        .submit_signed(tx_id, &signed)
        .await
        .unwrap();

    tx_id
}
