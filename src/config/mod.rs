//! Configuration for solbridge.
//!
//! All settings come from environment variables (loaded via dotenvy early in
//! startup). Validation happens once at startup so every component can trust
//! the values it receives.

use std::path::PathBuf;

use solana_sdk::commitment_config::CommitmentConfig;
use url::Url;

use crate::error::ConfigError;

/// Main configuration for the bridge.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub solana: SolanaConfig,
    pub gateway: GatewayConfig,
    pub links: LinkConfig,
}

/// Embedded database settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path of the local libSQL database file.
    pub path: PathBuf,
}

/// Solana RPC settings.
#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub commitment: CommitmentConfig,
}

/// HTTP gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
}

/// Bases for user-facing approval and connect links.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Base URL of the wallet-side frontend, without a trailing slash.
    pub frontend_url: String,
}

impl Config {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            solana: SolanaConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            links: LinkConfig::from_env()?,
        })
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let path = required_env(
            "DATABASE_URL",
            "Set it to the path of the local libSQL database file, e.g. ./solbridge.db",
        )?;
        Ok(Self {
            path: PathBuf::from(path),
        })
    }
}

impl SolanaConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = required_env(
            "SOLANA_RPC_URL",
            "Set it to a Solana JSON-RPC endpoint, e.g. https://api.devnet.solana.com",
        )?;
        validate_url("SOLANA_RPC_URL", &rpc_url)?;

        let commitment = match optional_env("SOLANA_COMMITMENT") {
            None => CommitmentConfig::confirmed(),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "processed" => CommitmentConfig::processed(),
                "confirmed" => CommitmentConfig::confirmed(),
                "finalized" => CommitmentConfig::finalized(),
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "SOLANA_COMMITMENT".to_string(),
                        message: format!(
                            "expected 'processed', 'confirmed', or 'finalized', got '{other}'"
                        ),
                    });
                }
            },
        };

        Ok(Self {
            rpc_url,
            commitment,
        })
    }
}

impl GatewayConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: optional_env("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8787".to_string()),
        })
    }
}

impl LinkConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let frontend_url = required_env(
            "FRONTEND_URL",
            "Set it to the wallet frontend base URL used for connect/approval links",
        )?;
        validate_url("FRONTEND_URL", &frontend_url)?;
        Ok(Self {
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL a user visits to bind their wallet with a connection token.
    pub fn connect_url(&self, token: &str) -> String {
        format!("{}/connect?token={}", self.frontend_url, token)
    }

    /// URL a user visits to review and sign a pending transaction.
    pub fn approval_url(&self, tx_id: uuid::Uuid) -> String {
        format!("{}/sign/{}", self.frontend_url, tx_id)
    }
}

fn required_env(key: &str, hint: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        }),
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn validate_url(key: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("not a valid URL: {e}"),
    })?;
    Ok(())
}
