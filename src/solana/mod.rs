//! Solana ledger integration: RPC gateway and transfer construction.

pub mod builder;
pub mod gateway;

pub use builder::{BuiltTransfer, TransactionBuilder, amount_to_lamports, parse_wallet_address};
pub use gateway::{HistoryEntry, LedgerRpc, RpcGateway, SignatureStatus, TokenBalance};

/// Flat network fee estimate for a single-signature transfer, in lamports.
pub const ESTIMATED_FEE_LAMPORTS: u64 = 5_000;
