//! Pending-transaction authorization state machine.
//!
//! Owns the lifecycle of a proposed transfer from creation to a terminal
//! state: duplicate suppression on create, signer verification on sign,
//! compare-and-set status transitions throughout, and a single
//! reconciliation path that resolves submitted records against chain truth.

use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use uuid::Uuid;

use crate::db::{Database, PendingTransaction, PendingTxStore, Session, TxStatus};
use crate::error::{DatabaseError, Error, Result, SessionError, TransactionError};
use crate::solana::builder::TransactionBuilder;
use crate::solana::gateway::LedgerRpc;

/// How long an unsigned proposal stays approvable, in minutes.
const APPROVAL_EXPIRY_MINUTES: i64 = 15;

/// Result of a create request.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// A new proposal was stored.
    Created(PendingTransaction),
    /// An equivalent non-terminal proposal already existed; this is the
    /// idempotence contract for repeated tool calls.
    Existing(PendingTransaction),
}

impl CreateOutcome {
    pub fn record(&self) -> &PendingTransaction {
        match self {
            Self::Created(tx) | Self::Existing(tx) => tx,
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}

/// Drives proposed transfers through
/// `pending → signed → submitted → {confirmed | failed}`.
pub struct TransferAuthorizer {
    store: Arc<dyn Database>,
    ledger: Arc<dyn LedgerRpc>,
    builder: TransactionBuilder,
}

impl TransferAuthorizer {
    pub fn new(store: Arc<dyn Database>, ledger: Arc<dyn LedgerRpc>) -> Self {
        let builder = TransactionBuilder::new(Arc::clone(&ledger));
        Self {
            store,
            ledger,
            builder,
        }
    }

    /// Create a transfer proposal, or return the live equivalent.
    ///
    /// The duplicate check runs before the (expensive) build and is
    /// re-validated right before insert; a racing insert that still slips
    /// through hits the storage uniqueness constraint, and the loser
    /// converges to the winner's record.
    pub async fn create_transfer(
        &self,
        session: &Session,
        recipient_address: &str,
        amount: Decimal,
        memo: Option<&str>,
    ) -> Result<CreateOutcome> {
        let wallet_address = session
            .wallet_address
            .as_deref()
            .ok_or(SessionError::WalletNotConnected)?;

        let lamports = crate::solana::amount_to_lamports(amount)?;

        if let Some(existing) = self
            .store
            .find_active_transaction(&session.session_id, recipient_address, lamports)
            .await?
        {
            return Ok(CreateOutcome::Existing(existing));
        }

        let built = self
            .builder
            .build_unsigned_transfer(wallet_address, recipient_address, amount, memo)
            .await?;
        debug_assert_eq!(built.lamports, lamports);

        // Re-validate right before insert: the build awaited on the network
        // and a concurrent call may have created the record meanwhile.
        if let Some(existing) = self
            .store
            .find_active_transaction(&session.session_id, recipient_address, lamports)
            .await?
        {
            return Ok(CreateOutcome::Existing(existing));
        }

        let now = Utc::now();
        let record = PendingTransaction {
            tx_id: Uuid::new_v4(),
            session_id: session.session_id.clone(),
            wallet_address: wallet_address.to_string(),
            recipient_address: recipient_address.to_string(),
            amount_lamports: built.lamports,
            status: TxStatus::Pending,
            unsigned_payload: built.unsigned_payload,
            signature: None,
            expires_at: now + Duration::minutes(APPROVAL_EXPIRY_MINUTES),
            created_at: now,
        };

        match self.store.insert_transaction(&record).await {
            Ok(()) => {
                tracing::info!(tx_id = %record.tx_id, lamports, "transfer proposal created");
                Ok(CreateOutcome::Created(record))
            }
            Err(DatabaseError::Constraint(_)) => {
                let winner = self
                    .store
                    .find_active_transaction(&session.session_id, recipient_address, lamports)
                    .await?
                    .ok_or_else(|| {
                        Error::Database(DatabaseError::Constraint(
                            "active transfer vanished during creation race".to_string(),
                        ))
                    })?;
                Ok(CreateOutcome::Existing(winner))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Accept an externally-signed payload for a pending proposal.
    ///
    /// Guards, in order: the record exists, is still `pending`, and has not
    /// lapsed. The payload must decode to the proposed message, fee-paid and
    /// signed by the record's wallet; anything else fails closed with the
    /// record left at `pending`. On success the record advances to `signed`
    /// and the verified transaction is returned for immediate submission.
    pub async fn attach_signed(
        &self,
        tx_id: Uuid,
        signed_payload_b64: &str,
    ) -> Result<(PendingTransaction, Transaction)> {
        let record = self.require_transaction(tx_id).await?;

        if record.status != TxStatus::Pending {
            return Err(TransactionError::AlreadyProcessed {
                tx_id,
                status: record.status.as_str().to_string(),
            }
            .into());
        }

        let now = Utc::now();
        if record.approval_expired(now) {
            // Observe the lapse before anything else: flag it so no later
            // read can advance this record.
            self.store
                .transition_status(tx_id, TxStatus::Pending, TxStatus::Expired)
                .await?;
            return Err(TransactionError::Expired { tx_id }.into());
        }

        let signed = decode_signed_payload(signed_payload_b64)?;
        verify_signed_payload(&signed, &record)?;

        let advanced = self
            .store
            .transition_status(tx_id, TxStatus::Pending, TxStatus::Signed)
            .await?;
        if !advanced {
            let current = self.require_transaction(tx_id).await?;
            return Err(TransactionError::AlreadyProcessed {
                tx_id,
                status: current.status.as_str().to_string(),
            }
            .into());
        }

        let record = self.require_transaction(tx_id).await?;
        Ok((record, signed))
    }

    /// Submit a verified signed transaction to the ledger.
    ///
    /// Only a `signed` record may be submitted. The caller holds the
    /// transaction returned by [`attach_signed`], so signature verification
    /// and submission are adjacent in the protocol.
    pub async fn submit_signed(
        &self,
        tx_id: Uuid,
        transaction: &Transaction,
    ) -> Result<(PendingTransaction, Signature)> {
        let record = self.require_transaction(tx_id).await?;
        if record.status != TxStatus::Signed {
            return Err(TransactionError::AlreadyProcessed {
                tx_id,
                status: record.status.as_str().to_string(),
            }
            .into());
        }

        let signature = self.ledger.send_transaction(transaction).await?;

        let advanced = self
            .store
            .record_submission(tx_id, &signature.to_string())
            .await?;
        if !advanced {
            let current = self.require_transaction(tx_id).await?;
            return Err(TransactionError::AlreadyProcessed {
                tx_id,
                status: current.status.as_str().to_string(),
            }
            .into());
        }

        tracing::info!(tx_id = %tx_id, signature = %signature, "transfer submitted");

        let record = self.require_transaction(tx_id).await?;
        Ok((record, signature))
    }

    /// Resolve a submitted record against chain truth.
    ///
    /// The one reconciliation path: the status route, the check tool, and
    /// the background worker all funnel through here. Finalized with an
    /// error → `failed`; finalized clean → `confirmed`; unseen or not yet
    /// finalized → unchanged, polled again later. Records that are not
    /// `submitted` are returned as-is.
    pub async fn reconcile(&self, tx_id: Uuid) -> Result<PendingTransaction> {
        let record = self.require_transaction(tx_id).await?;

        if record.status != TxStatus::Submitted {
            return Ok(record);
        }
        let Some(signature_text) = record.signature.as_deref() else {
            return Ok(record);
        };
        let signature = Signature::from_str(signature_text).map_err(|e| {
            DatabaseError::Serialization(format!("bad stored signature '{signature_text}': {e}"))
        })?;

        match self.ledger.get_signature_status(&signature).await? {
            Some(status) if status.finalized => {
                let outcome = if status.err.is_some() {
                    TxStatus::Failed
                } else {
                    TxStatus::Confirmed
                };
                self.store
                    .transition_status(tx_id, TxStatus::Submitted, outcome)
                    .await?;
                tracing::info!(tx_id = %tx_id, outcome = outcome.as_str(), "transfer reconciled");
                self.require_transaction(tx_id).await
            }
            _ => Ok(record),
        }
    }

    /// Best-effort post-submission wait, then the authoritative reconcile.
    /// Intended to be spawned fire-and-forget; failures are only logged.
    pub async fn confirm_and_reconcile(&self, tx_id: Uuid, signature: Signature) {
        if let Err(err) = self
            .ledger
            .confirm_transaction(&signature, CommitmentConfig::finalized())
            .await
        {
            tracing::warn!(tx_id = %tx_id, error = %err, "confirmation wait failed");
        }
        if let Err(err) = self.reconcile(tx_id).await {
            tracing::warn!(tx_id = %tx_id, error = %err, "post-submit reconcile failed");
        }
    }

    /// Flag lapsed `pending` proposals as `expired`. Signed and submitted
    /// records are out of scope: once signed, only chain truth decides.
    pub async fn sweep_expired(&self) -> Result<u64> {
        Ok(self.store.expire_stale_transactions(Utc::now()).await?)
    }

    pub async fn get(&self, tx_id: Uuid) -> Result<Option<PendingTransaction>> {
        Ok(self.store.get_transaction(tx_id).await?)
    }

    async fn require_transaction(&self, tx_id: Uuid) -> Result<PendingTransaction> {
        self.store
            .get_transaction(tx_id)
            .await?
            .ok_or_else(|| TransactionError::NotFound { tx_id }.into())
    }
}

fn decode_signed_payload(payload_b64: &str) -> Result<Transaction> {
    let bytes = BASE64
        .decode(payload_b64.trim())
        .map_err(|e| TransactionError::MalformedPayload(format!("invalid base64: {e}")))?;
    let transaction: Transaction = bincode::deserialize(&bytes)
        .map_err(|e| TransactionError::MalformedPayload(format!("invalid transaction: {e}")))?;
    Ok(transaction)
}

/// Fail-closed verification of a signed payload against its record.
///
/// The fee payer must be the record's wallet and its signature must verify
/// for the message; the signed message must also be byte-identical to the
/// proposed one, so a signature cannot be swapped onto different content.
fn verify_signed_payload(
    signed: &Transaction,
    record: &PendingTransaction,
) -> std::result::Result<(), Error> {
    let expected: Pubkey = record.wallet_address.parse().map_err(|e| {
        DatabaseError::Serialization(format!(
            "bad stored wallet address '{}': {e}",
            record.wallet_address
        ))
    })?;

    let signer = signed.message.account_keys.first();
    if signer != Some(&expected) {
        return Err(TransactionError::SignerMismatch.into());
    }
    let Some(signature) = signed.signatures.first() else {
        return Err(TransactionError::SignerMismatch.into());
    };
    if *signature == Signature::default() {
        return Err(TransactionError::SignerMismatch.into());
    }
    if signed.verify().is_err() {
        return Err(TransactionError::SignerMismatch.into());
    }

    let proposed: Transaction = bincode::deserialize(&record.unsigned_payload)
        .map_err(|e| DatabaseError::Serialization(format!("bad stored unsigned payload: {e}")))?;
    if signed.message != proposed.message {
        return Err(TransactionError::MalformedPayload(
            "signed message does not match the proposed transfer".to_string(),
        )
        .into());
    }

    Ok(())
}
