//! Request and response DTOs for the wallet-side HTTP API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::db::PendingTransaction;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub token: String,
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProbeResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub tx_id: Uuid,
    pub session_id: String,
    pub wallet_address: String,
    pub recipient_address: String,
    pub amount_lamports: u64,
    pub status: String,
    /// Base64 of the serialized unsigned transaction, for the wallet to sign.
    pub unsigned_transaction: String,
    pub signature: Option<String>,
    pub expires_at: String,
    pub created_at: String,
}

impl From<&PendingTransaction> for TransactionResponse {
    fn from(tx: &PendingTransaction) -> Self {
        Self {
            tx_id: tx.tx_id,
            session_id: tx.session_id.clone(),
            wallet_address: tx.wallet_address.clone(),
            recipient_address: tx.recipient_address.clone(),
            amount_lamports: tx.amount_lamports,
            status: tx.status.as_str().to_string(),
            unsigned_transaction: BASE64.encode(&tx.unsigned_payload),
            signature: tx.signature.clone(),
            expires_at: tx.expires_at.to_rfc3339(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    /// Base64 of the signed transaction produced by the wallet.
    pub signed_transaction: String,
}

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub success: bool,
    pub signature: String,
    pub explorer: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub tx_id: Uuid,
    pub status: String,
    pub signature: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub solana_healthy: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
