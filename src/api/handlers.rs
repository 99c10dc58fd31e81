//! HTTP handlers for the wallet-side surface.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use solana_sdk::signature::Signature;
use uuid::Uuid;

use crate::api::types::*;
use crate::bootstrap::Services;
use crate::db::{SessionStatus, SessionStore};
use crate::error::{Error, SessionError, TransactionError, TransferError};

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn health(State(services): State<Arc<Services>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        solana_healthy: services.ledger.is_healthy().await,
    })
}

/// `POST /api/connect`: bind a wallet to the session owning the token.
pub async fn connect(
    State(services): State<Arc<Services>>,
    Json(body): Json<ConnectRequest>,
) -> ApiResult<ConnectResponse> {
    services
        .sessions
        .link_wallet(&body.token, &body.wallet_address)
        .await
        .map_err(error_response)?;
    Ok(Json(ConnectResponse { success: true }))
}

/// `GET /api/session/{token}`: validity probe for the connect page.
pub async fn session_probe(
    State(services): State<Arc<Services>>,
    Path(token): Path<String>,
) -> Result<(StatusCode, Json<SessionProbeResponse>), ApiError> {
    let session = services
        .store
        .get_session_by_token(&token)
        .await
        .map_err(|e| error_response(e.into()))?;

    let Some(session) = session else {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(SessionProbeResponse {
                valid: false,
                expired: None,
                connected: None,
                wallet_address: None,
            }),
        ));
    };

    if session.status == SessionStatus::Pending && session.token_expired(Utc::now()) {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(SessionProbeResponse {
                valid: false,
                expired: Some(true),
                connected: None,
                wallet_address: None,
            }),
        ));
    }

    Ok((
        StatusCode::OK,
        Json(SessionProbeResponse {
            valid: true,
            expired: None,
            connected: Some(session.wallet_connected()),
            wallet_address: session.wallet_address,
        }),
    ))
}

/// `GET /api/transaction/{tx_id}`: the record the approval page renders.
pub async fn get_transaction(
    State(services): State<Arc<Services>>,
    Path(tx_id): Path<Uuid>,
) -> ApiResult<TransactionResponse> {
    let record = services
        .authorizer
        .get(tx_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(TransactionError::NotFound { tx_id }.into()))?;
    Ok(Json(TransactionResponse::from(&record)))
}

/// `POST /api/transaction/{tx_id}/sign`: accept the wallet's signed payload.
///
/// Signature verification and submission stay adjacent: the transaction
/// returned by the sign step is the one submitted, and a best-effort
/// confirmation wait is spawned after; the background worker remains the
/// authoritative reconciler.
pub async fn sign_transaction(
    State(services): State<Arc<Services>>,
    Path(tx_id): Path<Uuid>,
    Json(body): Json<SignRequest>,
) -> ApiResult<SignResponse> {
    let (_, signed) = services
        .authorizer
        .attach_signed(tx_id, &body.signed_transaction)
        .await
        .map_err(error_response)?;

    let (_, signature) = services
        .authorizer
        .submit_signed(tx_id, &signed)
        .await
        .map_err(error_response)?;

    let authorizer = Arc::clone(&services.authorizer);
    tokio::spawn(async move {
        authorizer.confirm_and_reconcile(tx_id, signature).await;
    });

    Ok(Json(SignResponse {
        success: true,
        signature: signature.to_string(),
        explorer: explorer_url(&services.config.solana.rpc_url, &signature),
    }))
}

/// `GET /api/transaction/{tx_id}/status`: reconcile and report.
pub async fn transaction_status(
    State(services): State<Arc<Services>>,
    Path(tx_id): Path<Uuid>,
) -> ApiResult<StatusResponse> {
    let record = services
        .authorizer
        .reconcile(tx_id)
        .await
        .map_err(error_response)?;

    Ok(Json(StatusResponse {
        tx_id,
        status: record.status.as_str().to_string(),
        signature: record.signature,
    }))
}

fn explorer_url(rpc_url: &str, signature: &Signature) -> String {
    let base = format!("https://explorer.solana.com/tx/{signature}");
    if rpc_url.contains("devnet") {
        format!("{base}?cluster=devnet")
    } else if rpc_url.contains("testnet") {
        format!("{base}?cluster=testnet")
    } else {
        base
    }
}

fn error_response(err: Error) -> ApiError {
    let status = match &err {
        Error::Session(SessionError::NotFound { .. })
        | Error::Transaction(TransactionError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Session(_) => StatusCode::BAD_REQUEST,
        Error::Transaction(TransactionError::SignerMismatch) => StatusCode::FORBIDDEN,
        Error::Transaction(_) => StatusCode::BAD_REQUEST,
        Error::Transfer(TransferError::InsufficientBalance { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Error::Transfer(_) => StatusCode::BAD_REQUEST,
        Error::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::Rpc(_) => StatusCode::BAD_GATEWAY,
        Error::Config(_) | Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }

    // Same boundary rule as the tool surface: user-readable messages out,
    // internals stay internal.
    let message = err.to_agent_payload().message;
    (status, Json(ErrorBody { error: message }))
}
