//! solbridge: a Solana wallet bridge for AI agents.
//!
//! Lets an agent propose wallet actions (balance lookup, SOL transfer)
//! without ever holding the user's signing key. A time-boxed connection
//! token binds the agent's session to a user wallet; proposed transfers are
//! built unsigned, approved and signed in the user's own wallet, submitted,
//! and reconciled against chain truth by a background worker.
//!
//! Frontends: an MCP stdio server for the agent side, and an HTTP gateway
//! for the wallet-side connect/approval pages.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mcp;
pub mod security;
pub mod session;
pub mod solana;
pub mod tools;
pub mod transactions;

pub use bootstrap::Services;
pub use config::Config;
pub use error::{Error, Result};
