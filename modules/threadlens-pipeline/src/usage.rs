//! Usage accounting: one append-only log row per model invocation, with the
//! dollar cost from a static price table and a token-derived billing credit.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use threadlens_common::model::TokenUsage;
use threadlens_common::types::UsageLog;

use crate::traits::ContentStore;

/// USD per 1000 tokens: (model, prompt, completion). Embedding models bill
/// prompt-only.
const MODEL_PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.000_15, 0.000_6),
    ("gpt-4o", 0.002_5, 0.01),
    ("text-embedding-3-small", 0.000_02, 0.0),
    ("text-embedding-3-large", 0.000_13, 0.0),
];

/// Dollar cost of one call, or None for models missing from the table.
pub fn cost_usd(model: &str, usage: TokenUsage) -> Option<f64> {
    MODEL_PRICES
        .iter()
        .find(|(m, _, _)| *m == model)
        .map(|(_, prompt, completion)| {
            (usage.prompt_tokens as f64 / 1000.0) * prompt
                + (usage.completion_tokens as f64 / 1000.0) * completion
        })
}

/// Billing credits for one call: ceiling of total tokens over the
/// admin-configured tokens-per-credit divisor. Without a configured divisor
/// every call costs one credit regardless of size.
pub fn credit_for(total_tokens: u32, tokens_per_credit: Option<i64>) -> i64 {
    match tokens_per_credit {
        Some(ratio) if ratio > 0 => (i64::from(total_tokens) + ratio - 1) / ratio,
        _ => 1,
    }
}

/// Writes usage rows through the store. Log failures are warned and
/// swallowed; accounting must never break the pipeline.
pub struct UsageTracker {
    store: Arc<dyn ContentStore>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Record a successful call and return the credit charged for it.
    pub async fn record_success(
        &self,
        business: &str,
        user_id: Option<Uuid>,
        model: &str,
        usage: TokenUsage,
        duration_ms: i64,
    ) -> i64 {
        let ratio = match self.store.credit_mapping().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Failed to read credit mapping, defaulting to 1 credit per call");
                None
            }
        };
        let credit = credit_for(usage.total_tokens, ratio);

        let row = UsageLog {
            id: Uuid::new_v4(),
            user_id,
            business: business.to_string(),
            model: model.to_string(),
            prompt_tokens: i64::from(usage.prompt_tokens),
            completion_tokens: i64::from(usage.completion_tokens),
            total_tokens: i64::from(usage.total_tokens),
            cost_usd: cost_usd(model, usage),
            duration_ms,
            success: true,
            error_message: None,
            credit,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_usage_log(&row).await {
            warn!(business, model, error = %e, "Failed to write usage log");
        }
        credit
    }

    /// Record a failed call: zero tokens, zero credit.
    pub async fn record_failure(
        &self,
        business: &str,
        user_id: Option<Uuid>,
        model: &str,
        error: &str,
        duration_ms: i64,
    ) {
        let row = UsageLog {
            id: Uuid::new_v4(),
            user_id,
            business: business.to_string(),
            model: model.to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            cost_usd: None,
            duration_ms,
            success: false,
            error_message: Some(error.to_string()),
            credit: 0,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_usage_log(&row).await {
            warn!(business, model, error = %e, "Failed to write usage log");
        }
    }
}
