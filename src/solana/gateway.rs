//! Solana RPC gateway.
//!
//! One live connection per process, created lazily and shared by all
//! callers; `reset` forces re-creation after a detected failure without
//! disturbing in-flight calls that still hold the old handle. Every call
//! runs under a bounded retry for transient network failures. A
//! transaction error reported by the node is a terminal outcome, never
//! retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_account_decoder::UiAccountData;
use solana_client::client_error::ClientErrorKind;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::TransactionConfirmationStatus;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::error::RpcError;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// SPL Token program, used to enumerate token balances.
const TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// Chain-side view of a submitted signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    /// Error reported by the ledger, if the transaction failed on-chain.
    pub err: Option<String>,
    /// Whether the ledger reports the strongest commitment level.
    pub finalized: bool,
}

/// One SPL token holding of a wallet.
#[derive(Debug, Clone)]
pub struct TokenBalance {
    pub mint: String,
    pub ui_amount: String,
}

/// One entry of a wallet's recent-signature listing.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub err: Option<String>,
    pub memo: Option<String>,
}

/// Capability interface over the ledger RPC endpoint.
///
/// The state machine and tools depend on this trait, not on the concrete
/// client, so chain interactions stay mockable in tests.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcError>;

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError>;

    /// Recent status of a signature, `None` when the ledger has not seen it.
    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError>;

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, RpcError>;

    /// Wait for a commitment level. Best-effort; reconciliation remains the
    /// authoritative path.
    async fn confirm_transaction(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<bool, RpcError>;

    async fn get_token_balances(&self, owner: &Pubkey) -> Result<Vec<TokenBalance>, RpcError>;

    async fn get_recent_signatures(
        &self,
        owner: &Pubkey,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, RpcError>;

    async fn is_healthy(&self) -> bool;
}

/// Singleton Solana RPC connection with bounded retry.
pub struct RpcGateway {
    rpc_url: String,
    commitment: CommitmentConfig,
    client: RwLock<Option<Arc<RpcClient>>>,
}

impl RpcGateway {
    pub fn new(rpc_url: String, commitment: CommitmentConfig) -> Self {
        Self {
            rpc_url,
            commitment,
            client: RwLock::new(None),
        }
    }

    /// Get the shared client, creating it on first use.
    async fn handle(&self) -> Arc<RpcClient> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Arc::clone(client);
        }

        let mut guard = self.client.write().await;
        if let Some(client) = guard.as_ref() {
            return Arc::clone(client);
        }

        tracing::info!(rpc_url = %self.rpc_url, "creating Solana RPC connection");
        let client = Arc::new(RpcClient::new_with_commitment(
            self.rpc_url.clone(),
            self.commitment,
        ));
        *guard = Some(Arc::clone(&client));
        client
    }

    /// Drop the connection so the next call re-creates it. Callers holding a
    /// clone of the old handle finish their in-flight retries on it.
    pub async fn reset(&self) {
        *self.client.write().await = None;
        tracing::info!("Solana RPC connection reset");
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<RpcClient>) -> Fut,
        Fut: Future<Output = solana_client::client_error::Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let client = self.handle().await;
            match call(client).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    // A node-reported transaction error is a result, not a
                    // transport failure. Surface it untouched.
                    if let ClientErrorKind::TransactionError(tx_err) = err.kind() {
                        return Err(RpcError::Rejected {
                            op,
                            reason: tx_err.to_string(),
                        });
                    }
                    if attempt > MAX_RETRIES {
                        return Err(RpcError::Unavailable {
                            op,
                            attempts: attempt,
                            reason: err.to_string(),
                        });
                    }
                    tracing::warn!(op, attempt, error = %err, "RPC call failed, retrying");
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

#[async_trait]
impl LedgerRpc for RpcGateway {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        let address = *address;
        self.with_retry("getBalance", move |client| async move {
            client.get_balance(&address).await
        })
        .await
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
        self.with_retry("getLatestBlockhash", |client| async move {
            client.get_latest_blockhash().await
        })
        .await
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError> {
        let signature = *signature;
        let statuses = self
            .with_retry("getSignatureStatuses", move |client| async move {
                client.get_signature_statuses(&[signature]).await
            })
            .await?;

        Ok(statuses.value.into_iter().next().flatten().map(|status| {
            SignatureStatus {
                err: status.err.as_ref().map(|e| e.to_string()),
                finalized: matches!(
                    status.confirmation_status,
                    Some(TransactionConfirmationStatus::Finalized)
                ),
            }
        }))
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
        let transaction = transaction.clone();
        self.with_retry("sendTransaction", move |client| {
            let transaction = transaction.clone();
            async move { client.send_transaction(&transaction).await }
        })
        .await
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<bool, RpcError> {
        let signature = *signature;
        let response = self
            .with_retry("confirmTransaction", move |client| async move {
                client
                    .confirm_transaction_with_commitment(&signature, commitment)
                    .await
            })
            .await?;
        Ok(response.value)
    }

    async fn get_token_balances(&self, owner: &Pubkey) -> Result<Vec<TokenBalance>, RpcError> {
        let owner = *owner;
        let accounts = self
            .with_retry("getTokenAccountsByOwner", move |client| async move {
                client
                    .get_token_accounts_by_owner(
                        &owner,
                        TokenAccountsFilter::ProgramId(TOKEN_PROGRAM_ID),
                    )
                    .await
            })
            .await?;

        let mut balances = Vec::new();
        for keyed in accounts {
            let UiAccountData::Json(parsed) = keyed.account.data else {
                continue;
            };
            let info = &parsed.parsed["info"];
            let mint = info["mint"].as_str().unwrap_or_default().to_string();
            let ui_amount = info["tokenAmount"]["uiAmountString"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let raw_amount = info["tokenAmount"]["amount"].as_str().unwrap_or("0");

            if !mint.is_empty() && raw_amount != "0" {
                balances.push(TokenBalance { mint, ui_amount });
            }
        }
        Ok(balances)
    }

    async fn get_recent_signatures(
        &self,
        owner: &Pubkey,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, RpcError> {
        let owner = *owner;
        let entries = self
            .with_retry("getSignaturesForAddress", move |client| async move {
                client
                    .get_signatures_for_address_with_config(
                        &owner,
                        GetConfirmedSignaturesForAddress2Config {
                            limit: Some(limit),
                            ..Default::default()
                        },
                    )
                    .await
            })
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| HistoryEntry {
                signature: entry.signature,
                slot: entry.slot,
                block_time: entry.block_time,
                err: entry.err.as_ref().map(|e| e.to_string()),
                memo: entry.memo,
            })
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        self.get_latest_blockhash().await.is_ok()
    }
}

impl std::fmt::Debug for RpcGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcGateway")
            .field("rpc_url", &self.rpc_url)
            .field("commitment", &self.commitment)
            .finish()
    }
}

/// Scripted in-memory ledger for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// A ledger whose responses are scripted by the test.
    pub(crate) struct ScriptedLedger {
        pub balance: Mutex<u64>,
        pub blockhash: Hash,
        pub signature_status: Mutex<Option<SignatureStatus>>,
        pub sent: Mutex<Vec<Transaction>>,
        pub token_balances: Mutex<Vec<TokenBalance>>,
        pub history: Mutex<Vec<HistoryEntry>>,
        pub healthy: AtomicBool,
    }

    impl ScriptedLedger {
        pub fn with_balance(balance: u64) -> Self {
            Self {
                balance: Mutex::new(balance),
                blockhash: Hash::new_unique(),
                signature_status: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                token_balances: Mutex::new(Vec::new()),
                history: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
            }
        }

        /// A wallet with 100 SOL, enough for any test transfer.
        pub fn rich() -> Self {
            Self::with_balance(100_000_000_000)
        }

        pub fn set_signature_status(&self, status: Option<SignatureStatus>) {
            *self.signature_status.lock().unwrap() = status;
        }
    }

    #[async_trait]
    impl LedgerRpc for ScriptedLedger {
        async fn get_balance(&self, _address: &Pubkey) -> Result<u64, RpcError> {
            Ok(*self.balance.lock().unwrap())
        }

        async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
            Ok(self.blockhash)
        }

        async fn get_signature_status(
            &self,
            _signature: &Signature,
        ) -> Result<Option<SignatureStatus>, RpcError> {
            Ok(self.signature_status.lock().unwrap().clone())
        }

        async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
            self.sent.lock().unwrap().push(transaction.clone());
            Ok(transaction.signatures[0])
        }

        async fn confirm_transaction(
            &self,
            _signature: &Signature,
            _commitment: CommitmentConfig,
        ) -> Result<bool, RpcError> {
            Ok(true)
        }

        async fn get_token_balances(&self, _owner: &Pubkey) -> Result<Vec<TokenBalance>, RpcError> {
            Ok(self.token_balances.lock().unwrap().clone())
        }

        async fn get_recent_signatures(
            &self,
            _owner: &Pubkey,
            limit: usize,
        ) -> Result<Vec<HistoryEntry>, RpcError> {
            let history = self.history.lock().unwrap();
            Ok(history.iter().take(limit).cloned().collect())
        }

        async fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::Relaxed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_clears_the_lazy_handle() {
        let gateway = RpcGateway::new(
            "http://localhost:8899".to_string(),
            CommitmentConfig::confirmed(),
        );
        assert!(gateway.client.read().await.is_none());

        let first = gateway.handle().await;
        assert!(gateway.client.read().await.is_some());

        gateway.reset().await;
        assert!(gateway.client.read().await.is_none());

        // The old handle stays usable for in-flight work; the next
        // acquisition creates a fresh connection.
        let second = gateway.handle().await;
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn token_program_id_matches_the_spl_program() {
        assert_eq!(
            TOKEN_PROGRAM_ID.to_string(),
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"
        );
    }
}
