//! Background reconciliation.
//!
//! Periodically flags lapsed proposals and resolves submitted transfers
//! against chain truth. One bad record never halts a sweep: per-record
//! failures are logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::db::{Database, PendingTxStore};
use crate::transactions::TransferAuthorizer;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Polls submitted transactions to a terminal state and expires stale
/// proposals.
pub struct ReconciliationWorker {
    store: Arc<dyn Database>,
    authorizer: Arc<TransferAuthorizer>,
    interval: Duration,
}

impl ReconciliationWorker {
    pub fn new(store: Arc<dyn Database>, authorizer: Arc<TransferAuthorizer>) -> Self {
        Self {
            store,
            authorizer,
            interval: DEFAULT_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop. Never returns; spawn it.
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "reconciliation worker started");
        loop {
            self.tick().await;
            sleep(self.interval).await;
        }
    }

    /// One sweep: expire, then reconcile everything submitted.
    pub async fn tick(&self) {
        match self.authorizer.sweep_expired().await {
            Ok(0) => {}
            Ok(flagged) => tracing::info!(flagged, "expired stale transfer proposals"),
            Err(err) => tracing::error!(error = %err, "expiry sweep failed"),
        }

        let submitted = match self.store.list_submitted().await {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(error = %err, "failed to list submitted transactions");
                return;
            }
        };

        for record in submitted {
            if let Err(err) = self.authorizer.reconcile(record.tx_id).await {
                tracing::warn!(tx_id = %record.tx_id, error = %err, "reconcile failed, will retry next sweep");
            }
        }
    }
}
