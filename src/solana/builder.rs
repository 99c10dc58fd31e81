//! Unsigned transfer construction.
//!
//! Validates inputs, checks sender solvency, then builds and serializes a
//! System-program transfer for the wallet to sign. The returned lamports
//! value is the canonical integer amount persisted downstream; the decimal
//! input is never converted again.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;

use crate::error::{Error, TransferError};
use crate::solana::ESTIMATED_FEE_LAMPORTS;
use crate::solana::gateway::LedgerRpc;

/// SPL Memo program, for the optional transfer note.
const MEMO_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// Maximum fractional precision of SOL amounts.
const MAX_SOL_DECIMALS: u32 = 9;

/// Result of building an unsigned transfer.
#[derive(Debug, Clone)]
pub struct BuiltTransfer {
    /// Serialized unsigned transaction (no signatures attached yet).
    pub unsigned_payload: Vec<u8>,
    /// Canonical integer amount in lamports.
    pub lamports: u64,
}

/// Parse and validate a wallet address.
///
/// System-program transfer endpoints must be on the ed25519 curve; a
/// program-derived address here is a caller mistake, not a transfer target.
pub fn parse_wallet_address(field: &'static str, address: &str) -> Result<Pubkey, TransferError> {
    let pubkey = Pubkey::from_str(address).map_err(|_| TransferError::InvalidAddress {
        field,
        reason: "not a valid base58 Solana address".to_string(),
    })?;
    if !pubkey.is_on_curve() {
        return Err(TransferError::InvalidAddress {
            field,
            reason: "address is not on the ed25519 curve".to_string(),
        });
    }
    Ok(pubkey)
}

/// Convert a SOL amount to lamports, rejecting non-positive values and
/// excess fractional precision.
pub fn amount_to_lamports(amount: Decimal) -> Result<u64, TransferError> {
    if amount <= Decimal::ZERO {
        return Err(TransferError::InvalidAmount {
            reason: "amount must be greater than zero".to_string(),
        });
    }

    let normalized = amount.normalize();
    if normalized.scale() > MAX_SOL_DECIMALS {
        return Err(TransferError::InvalidAmount {
            reason: format!("amount exceeds maximum SOL precision ({MAX_SOL_DECIMALS} decimals)"),
        });
    }

    (normalized * Decimal::from(LAMPORTS_PER_SOL))
        .to_u64()
        .ok_or_else(|| TransferError::InvalidAmount {
            reason: "amount is too large".to_string(),
        })
}

/// Builds unsigned transfers against the ledger.
pub struct TransactionBuilder {
    ledger: Arc<dyn LedgerRpc>,
}

impl TransactionBuilder {
    pub fn new(ledger: Arc<dyn LedgerRpc>) -> Self {
        Self { ledger }
    }

    /// Validate and build an unsigned SOL transfer.
    ///
    /// Fail-fast order: address well-formedness, amount validity, sender
    /// solvency (amount + fee). Only then is a fresh blockhash fetched and
    /// the transaction serialized.
    pub async fn build_unsigned_transfer(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
        memo: Option<&str>,
    ) -> Result<BuiltTransfer, Error> {
        let sender_key = parse_wallet_address("sender", sender)?;
        let recipient_key = parse_wallet_address("recipient", recipient)?;
        let lamports = amount_to_lamports(amount)?;

        let available = self.ledger.get_balance(&sender_key).await?;
        let required = lamports + ESTIMATED_FEE_LAMPORTS;
        if available < required {
            return Err(TransferError::InsufficientBalance {
                required_lamports: required,
                available_lamports: available,
            }
            .into());
        }

        let blockhash = self.ledger.get_latest_blockhash().await?;

        let mut instructions = vec![system_instruction::transfer(
            &sender_key,
            &recipient_key,
            lamports,
        )];
        if let Some(memo) = memo.map(str::trim).filter(|m| !m.is_empty()) {
            instructions.push(memo_instruction(memo));
        }

        let mut message = Message::new(&instructions, Some(&sender_key));
        message.recent_blockhash = blockhash;
        let transaction = Transaction::new_unsigned(message);

        let unsigned_payload = bincode::serialize(&transaction)
            .map_err(|e| TransferError::BuildFailed(e.to_string()))?;

        Ok(BuiltTransfer {
            unsigned_payload,
            lamports,
        })
    }
}

fn memo_instruction(memo: &str) -> Instruction {
    Instruction::new_with_bytes(MEMO_PROGRAM_ID, memo.as_bytes(), vec![])
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use solana_sdk::signature::{Keypair, Signature, Signer};

    use super::*;
    use crate::solana::gateway::testing::ScriptedLedger;

    fn builder_with_balance(balance: u64) -> TransactionBuilder {
        TransactionBuilder::new(Arc::new(ScriptedLedger::with_balance(balance)))
    }

    #[test]
    fn amounts_convert_exactly_to_lamports() {
        assert_eq!(amount_to_lamports(dec!(1.5)).unwrap(), 1_500_000_000);
        assert_eq!(amount_to_lamports(dec!(0.000000001)).unwrap(), 1);
        assert_eq!(amount_to_lamports(dec!(2)).unwrap(), 2_000_000_000);
        // Trailing zeros beyond nine places are not excess precision.
        assert_eq!(amount_to_lamports(dec!(0.5000000000)).unwrap(), 500_000_000);
    }

    #[test]
    fn non_positive_and_over_precise_amounts_are_rejected() {
        assert!(matches!(
            amount_to_lamports(dec!(0)),
            Err(TransferError::InvalidAmount { .. })
        ));
        assert!(matches!(
            amount_to_lamports(dec!(-1)),
            Err(TransferError::InvalidAmount { .. })
        ));
        assert!(matches!(
            amount_to_lamports(dec!(0.0000000001)),
            Err(TransferError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn malformed_and_off_curve_addresses_are_rejected() {
        assert!(matches!(
            parse_wallet_address("sender", "not-base58!"),
            Err(TransferError::InvalidAddress { field: "sender", .. })
        ));

        // Program-derived addresses are off-curve.
        let (pda, _) = Pubkey::find_program_address(&[b"seed"], &solana_sdk::system_program::id());
        assert!(matches!(
            parse_wallet_address("recipient", &pda.to_string()),
            Err(TransferError::InvalidAddress { field: "recipient", .. })
        ));

        let wallet = Keypair::new().pubkey();
        assert_eq!(parse_wallet_address("sender", &wallet.to_string()).unwrap(), wallet);
    }

    #[tokio::test]
    async fn solvency_check_covers_amount_plus_fee() {
        let sender = Keypair::new().pubkey().to_string();
        let recipient = Keypair::new().pubkey().to_string();

        // Exactly the amount, but not the fee.
        let builder = builder_with_balance(1_500_000_000);
        let err = builder
            .build_unsigned_transfer(&sender, &recipient, dec!(1.5), None)
            .await
            .unwrap_err();
        match err {
            Error::Transfer(TransferError::InsufficientBalance {
                required_lamports,
                available_lamports,
            }) => {
                assert_eq!(required_lamports, 1_500_000_000 + ESTIMATED_FEE_LAMPORTS);
                assert_eq!(available_lamports, 1_500_000_000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn builds_a_serializable_unsigned_transfer() {
        let sender_key = Keypair::new();
        let sender = sender_key.pubkey().to_string();
        let recipient = Keypair::new().pubkey().to_string();

        let builder = builder_with_balance(10_000_000_000);
        let built = builder
            .build_unsigned_transfer(&sender, &recipient, dec!(1.5), None)
            .await
            .unwrap();

        assert_eq!(built.lamports, 1_500_000_000);

        let decoded: Transaction = bincode::deserialize(&built.unsigned_payload).unwrap();
        assert_eq!(decoded.message.account_keys[0], sender_key.pubkey());
        // Unsigned: the signature slot exists but is all zeroes.
        assert_eq!(decoded.signatures.len(), 1);
        assert_eq!(decoded.signatures[0], Signature::default());
    }

    #[tokio::test]
    async fn memo_adds_an_instruction() {
        let sender = Keypair::new().pubkey().to_string();
        let recipient = Keypair::new().pubkey().to_string();
        let builder = builder_with_balance(10_000_000_000);

        let plain = builder
            .build_unsigned_transfer(&sender, &recipient, dec!(1), None)
            .await
            .unwrap();
        let with_memo = builder
            .build_unsigned_transfer(&sender, &recipient, dec!(1), Some("rent"))
            .await
            .unwrap();

        let plain: Transaction = bincode::deserialize(&plain.unsigned_payload).unwrap();
        let with_memo: Transaction = bincode::deserialize(&with_memo.unsigned_payload).unwrap();
        assert_eq!(plain.message.instructions.len(), 1);
        assert_eq!(with_memo.message.instructions.len(), 2);
    }
}
