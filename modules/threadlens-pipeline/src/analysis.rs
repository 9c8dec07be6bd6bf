//! Second-stage pipeline: score unanalyzed posts against each user's search
//! criteria with the text-generation model.
//!
//! The worker's failure surface is deliberately soft: any problem with one
//! post (model error, refusal, schema violation, persist conflict) becomes a
//! logged skip, never an error. Only the selector query failing aborts a run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ai_client::util::{strip_code_blocks, truncate_to_char_boundary};
use threadlens_common::model::TextGenerator;
use threadlens_common::types::{AnalysisRecord, UnanalyzedPost};
use threadlens_common::ThreadlensError;

use crate::traits::ContentStore;
use crate::usage::UsageTracker;

/// Business tag on usage rows written by the analysis worker.
pub const ANALYSIS_BUSINESS: &str = "post_analysis";

/// Posts analyzed concurrently per batch.
const BATCH_SIZE: usize = 10;

/// Pause between batches to smooth the call rate at the provider.
const BATCH_PAUSE: Duration = Duration::from_secs(1);

/// Body text is capped before prompting to stay inside context limits.
const MAX_BODY_BYTES: usize = 12_000;

const SYSTEM_PROMPT: &str = "You judge whether a forum post is relevant to a user's search interest. \
Respond with a single JSON object and nothing else: \
{\"confidence\": <number between 0 and 1>, \"relation\": \"<short label>\", \"reason\": \"<one or two sentences>\"}. \
Do not add commentary around the JSON.";

/// The model's verdict, as a closed contract. Anything that does not parse
/// and validate into this shape is a skip.
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub confidence: f64,
    pub relation: String,
    pub reason: String,
}

/// Parse and validate a raw model response into a verdict.
pub fn parse_verdict(raw: &str) -> std::result::Result<Verdict, ThreadlensError> {
    let trimmed = raw.trim();

    // A response that is not even JSON-shaped is a deliberate refusal;
    // don't bother parsing it.
    if !trimmed.starts_with('{') && !trimmed.starts_with("```") {
        return Err(ThreadlensError::ModelOutputInvalid(
            "response is not JSON-shaped".to_string(),
        ));
    }

    let stripped = strip_code_blocks(trimmed);
    let verdict: Verdict = serde_json::from_str(stripped)
        .map_err(|e| ThreadlensError::ModelOutputInvalid(format!("bad JSON: {e}")))?;

    if !verdict.confidence.is_finite() || !(0.0..=1.0).contains(&verdict.confidence) {
        return Err(ThreadlensError::ModelOutputInvalid(format!(
            "confidence {} outside [0,1]",
            verdict.confidence
        )));
    }
    if verdict.relation.trim().is_empty() {
        return Err(ThreadlensError::ModelOutputInvalid(
            "empty relation".to_string(),
        ));
    }
    if verdict.reason.trim().is_empty() {
        return Err(ThreadlensError::ModelOutputInvalid(
            "empty reason".to_string(),
        ));
    }

    Ok(verdict)
}

fn build_user_prompt(item: &UnanalyzedPost) -> String {
    let body = truncate_to_char_boundary(&item.body, MAX_BODY_BYTES);
    format!(
        "Search interest: {}\n\nChannel: {}\n\nPost title: {}\n\nPost body:\n{}",
        item.retrieval_query, item.channel_path, item.title, body
    )
}

// ---------------------------------------------------------------------------
// AnalysisWorker
// ---------------------------------------------------------------------------

pub struct AnalysisWorker {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn ContentStore>,
    usage: UsageTracker,
}

impl AnalysisWorker {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn ContentStore>) -> Self {
        Self {
            generator,
            usage: UsageTracker::new(store.clone()),
            store,
        }
    }

    /// Analyze one post for one user. None means skipped; every failure mode
    /// is contained here so a batch sibling is never affected.
    pub async fn analyze(&self, item: &UnanalyzedPost) -> Option<AnalysisRecord> {
        let model = self.generator.model().to_string();
        let user_prompt = build_user_prompt(item);

        let started = Instant::now();
        let result = self.generator.generate(SYSTEM_PROMPT, &user_prompt).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let generated = match result {
            Ok(g) => {
                self.usage
                    .record_success(
                        ANALYSIS_BUSINESS,
                        Some(item.user_id),
                        &model,
                        g.usage,
                        duration_ms,
                    )
                    .await;
                g
            }
            Err(e) => {
                self.usage
                    .record_failure(
                        ANALYSIS_BUSINESS,
                        Some(item.user_id),
                        &model,
                        &e.to_string(),
                        duration_ms,
                    )
                    .await;
                warn!(
                    post = %item.post_external_id,
                    user = %item.user_id,
                    error = %e,
                    "Model call failed, skipping post"
                );
                return None;
            }
        };

        let verdict = match parse_verdict(&generated.text) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    post = %item.post_external_id,
                    user = %item.user_id,
                    error = %e,
                    "Unusable model output, skipping post"
                );
                return None;
            }
        };

        let record = AnalysisRecord {
            id: Uuid::new_v4(),
            user_id: item.user_id,
            post_external_id: item.post_external_id.clone(),
            channel_id: item.channel_id,
            confidence: verdict.confidence.to_string(),
            relation: verdict.relation,
            reason: verdict.reason,
            created_at: Utc::now(),
        };

        match self.store.insert_analysis(&record).await {
            Ok(true) => {
                debug!(
                    post = %record.post_external_id,
                    confidence = %record.confidence,
                    relation = %record.relation,
                    "Analysis stored"
                );
                Some(record)
            }
            Ok(false) => {
                debug!(
                    post = %record.post_external_id,
                    user = %record.user_id,
                    "Already analyzed by a concurrent run, skipping"
                );
                None
            }
            Err(e) => {
                warn!(
                    post = %record.post_external_id,
                    error = %e,
                    "Failed to persist analysis, skipping"
                );
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AnalysisPipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AnalysisStats {
    pub candidates: usize,
    pub analyzed: usize,
    pub skipped: usize,
}

impl std::fmt::Display for AnalysisStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Analysis Run Complete ===")?;
        writeln!(f, "Candidates: {}", self.candidates)?;
        writeln!(f, "Analyzed:   {}", self.analyzed)?;
        writeln!(f, "Skipped:    {}", self.skipped)?;
        Ok(())
    }
}

pub struct AnalysisPipeline {
    store: Arc<dyn ContentStore>,
    worker: AnalysisWorker,
}

impl AnalysisPipeline {
    pub fn new(store: Arc<dyn ContentStore>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            worker: AnalysisWorker::new(generator, store.clone()),
            store,
        }
    }

    /// Analyze every unanalyzed (post, setting) pair in batches of ten.
    /// Workers within a batch run concurrently and all settle; batches are
    /// sequential with a pause between them.
    pub async fn run(&self, user_scope: Option<Uuid>) -> Result<AnalysisStats> {
        let items = self
            .store
            .find_unanalyzed(user_scope)
            .await
            .context("unanalyzed-posts query failed")?;

        let mut stats = AnalysisStats {
            candidates: items.len(),
            ..Default::default()
        };

        if items.is_empty() {
            info!("No unanalyzed posts");
            return Ok(stats);
        }

        info!(candidates = items.len(), "Starting analysis run");

        for (index, batch) in items.chunks(BATCH_SIZE).enumerate() {
            if index > 0 {
                tokio::time::sleep(BATCH_PAUSE).await;
            }

            let results =
                futures::future::join_all(batch.iter().map(|item| self.worker.analyze(item)))
                    .await;

            for result in results {
                match result {
                    Some(_) => stats.analyzed += 1,
                    None => stats.skipped += 1,
                }
            }

            debug!(batch = index, done = stats.analyzed + stats.skipped, "Batch settled");
        }

        info!("{stats}");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_refusal_is_invalid() {
        let err = parse_verdict("I cannot help with that").unwrap_err();
        assert!(matches!(err, ThreadlensError::ModelOutputInvalid(_)));
    }

    #[test]
    fn bare_json_parses() {
        let v = parse_verdict(
            r#"{"confidence": 0.8, "relation": "strong", "reason": "matches keywords"}"#,
        )
        .unwrap();
        assert!((v.confidence - 0.8).abs() < 1e-9);
        assert_eq!(v.relation, "strong");
    }

    #[test]
    fn fenced_json_parses() {
        let v = parse_verdict(
            "```json\n{\"confidence\": 0.4, \"relation\": \"weak\", \"reason\": \"tangential\"}\n```",
        )
        .unwrap();
        assert!((v.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_confidence_is_invalid() {
        let err = parse_verdict(
            r#"{"confidence": 1.5, "relation": "strong", "reason": "sure"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ThreadlensError::ModelOutputInvalid(_)));
    }

    #[test]
    fn nan_confidence_is_invalid() {
        // NaN is not valid JSON; a bare "NaN" token fails at the parse step.
        let err = parse_verdict(r#"{"confidence": NaN, "relation": "x", "reason": "y"}"#)
            .unwrap_err();
        assert!(matches!(err, ThreadlensError::ModelOutputInvalid(_)));
    }

    #[test]
    fn empty_relation_or_reason_is_invalid() {
        assert!(parse_verdict(r#"{"confidence": 0.5, "relation": "", "reason": "ok"}"#).is_err());
        assert!(parse_verdict(r#"{"confidence": 0.5, "relation": "ok", "reason": "  "}"#).is_err());
    }

    #[test]
    fn missing_field_is_invalid() {
        assert!(parse_verdict(r#"{"confidence": 0.5, "relation": "ok"}"#).is_err());
    }

    #[test]
    fn boundary_confidences_are_valid() {
        assert!(parse_verdict(r#"{"confidence": 0.0, "relation": "none", "reason": "off"}"#).is_ok());
        assert!(parse_verdict(r#"{"confidence": 1.0, "relation": "exact", "reason": "on"}"#).is_ok());
    }
}
