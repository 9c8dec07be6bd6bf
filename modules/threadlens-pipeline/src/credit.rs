//! Batch recomputation of per-user credit balances from the usage log.
//!
//! Always recomputes the full sum, never increments, so re-running after a
//! partial failure converges on the same balances.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::traits::ContentStore;

pub struct CreditAccountant {
    store: Arc<dyn ContentStore>,
}

impl CreditAccountant {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Aggregate credits per user for one business tag and overwrite each
    /// user's balance row. System-attributed usage (no user) carries no
    /// balance. Returns how many balances were written.
    pub async fn recompute(&self, business: &str) -> Result<usize> {
        let totals = self
            .store
            .credit_totals(business)
            .await
            .context("credit aggregation query failed")?;

        let mut updated = 0usize;
        for (user_id, total) in totals {
            let Some(user_id) = user_id else {
                continue;
            };
            match self.store.upsert_credit_balance(user_id, total).await {
                Ok(()) => updated += 1,
                Err(e) => {
                    warn!(user = %user_id, error = %e, "Failed to update credit balance")
                }
            }
        }

        info!(business, updated, "Credit balances recomputed");
        Ok(updated)
    }
}
