//! Batch/cascade controller: bounds per-call payload size while preserving
//! whole-document semantics.
//!
//! Documents at or under the batch threshold go straight through as a single
//! backend call. Larger documents are split into ordered, non-overlapping
//! batches processed strictly sequentially: batch *i* receives the running
//! partial result from batch *i-1* inside its instructions, so the model can
//! leave resolved fields alone, complete values spanning page boundaries, or
//! correct a provisional value when later pages show better evidence.
//!
//! Merge policy: a non-null value from a later batch always replaces the
//! carried value. Documents are read top-to-bottom; later context is assumed
//! more complete for spanning fields. This is the documented tie-break.

use crate::backend::{null_extraction, ExtractionBackend, RawExtraction};
use crate::config::CascadeConfig;
use crate::error::Result;
use crate::schema::FieldSpec;
use serde_json::Value;
use std::ops::Range;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Running state across cascade batches. Replaced wholesale after each batch
/// so every batch's contribution stays auditable in the logs.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub batch_index: usize,
    pub carried: RawExtraction,
}

/// Terminal output of one backend's cascade run.
#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    /// Document-level raw extraction (the final carried partial result).
    pub fields: RawExtraction,
    /// Batches actually executed.
    pub batch_count: u32,
    /// False when the deadline cut the cascade short.
    pub complete: bool,
    /// Human-readable descriptions of batches that failed after retry.
    pub failures: Vec<String>,
}

pub struct CascadeController {
    config: CascadeConfig,
}

impl CascadeController {
    pub fn new(config: CascadeConfig) -> Self {
        Self { config }
    }

    /// Run one backend over the whole document, cascading if the page count
    /// exceeds the threshold. A deadline never raises: expiry returns the
    /// best partial result accumulated so far.
    pub async fn run(
        &self,
        backend: &dyn ExtractionBackend,
        fields: &[FieldSpec],
        instructions: &str,
        deadline: Option<Instant>,
    ) -> Result<CascadeOutcome> {
        let page_count = backend.page_count();

        if deadline_elapsed(deadline) {
            warn!("Deadline elapsed before first batch; returning empty partial");
            return Ok(CascadeOutcome {
                fields: null_extraction(fields),
                batch_count: 0,
                complete: false,
                failures: Vec::new(),
            });
        }

        if page_count <= self.config.batch_threshold {
            // Single batch: delegate directly, no cascading artifacts.
            debug!("{} page(s) fit in one batch", page_count);
            let fields_out = self
                .call_with_retry(backend, 0..page_count, fields, instructions)
                .await?;
            return Ok(CascadeOutcome {
                fields: fields_out,
                batch_count: 1,
                complete: true,
                failures: Vec::new(),
            });
        }

        let batches = partition(page_count, self.config.batch_threshold);
        info!(
            "Cascading {} pages into {} batches of <= {}",
            page_count,
            batches.len(),
            self.config.batch_threshold
        );

        let total_batches = batches.len();
        let mut ctx = BatchContext {
            batch_index: 0,
            carried: null_extraction(fields),
        };
        let mut failures = Vec::new();
        let mut executed = 0u32;
        let mut complete = true;

        for (idx, range) in batches.into_iter().enumerate() {
            if deadline_elapsed(deadline) {
                info!(
                    "Deadline elapsed after batch {}/{}; returning partial result",
                    idx, total_batches
                );
                complete = false;
                break;
            }

            let batch_instructions = if idx == 0 {
                instructions.to_string()
            } else {
                augment_with_carry(instructions, &ctx.carried, &range)
            };

            match self
                .call_with_retry(backend, range.clone(), fields, &batch_instructions)
                .await
            {
                Ok(batch_fields) => {
                    ctx = BatchContext {
                        batch_index: idx,
                        carried: merge_batch(&ctx.carried, &batch_fields),
                    };
                }
                Err(e) => {
                    // A failed batch leaves its fields unresolved; the
                    // cascade continues with the next batch.
                    warn!("Batch {} (pages {}-{}) unresolved: {}", idx + 1, range.start + 1, range.end, e);
                    failures.push(format!(
                        "batch {} (pages {}-{}) failed after retry: {}",
                        idx + 1,
                        range.start + 1,
                        range.end,
                        e.reason()
                    ));
                }
            }
            executed += 1;
        }

        Ok(CascadeOutcome {
            fields: ctx.carried,
            batch_count: executed,
            complete,
            failures,
        })
    }

    async fn call_with_retry(
        &self,
        backend: &dyn ExtractionBackend,
        range: Range<usize>,
        fields: &[FieldSpec],
        instructions: &str,
    ) -> Result<RawExtraction> {
        let mut attempt = 0;
        loop {
            match backend.extract(range.clone(), fields, instructions).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.config.batch_retries => {
                    warn!(
                        "{} backend failed on pages {}-{} (attempt {}): {}; retrying",
                        backend.kind().as_str(),
                        range.start + 1,
                        range.end,
                        attempt + 1,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn deadline_elapsed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Split `page_count` pages into ordered, non-overlapping ranges of at most
/// `threshold` pages.
fn partition(page_count: usize, threshold: usize) -> Vec<Range<usize>> {
    let threshold = threshold.max(1);
    (0..page_count)
        .step_by(threshold)
        .map(|start| start..(start + threshold).min(page_count))
        .collect()
}

/// Merge one batch's output into the carried partial result. New non-null
/// values always win; null never overwrites a resolved value.
pub fn merge_batch(carried: &RawExtraction, batch: &RawExtraction) -> RawExtraction {
    let mut merged = carried.clone();
    for (name, value) in batch {
        if !value.is_null() {
            merged.insert(name.clone(), value.clone());
        }
    }
    merged
}

/// Augment the caller's instructions with the carried partial result so the
/// next batch knows which fields are already resolved.
fn augment_with_carry(
    instructions: &str,
    carried: &RawExtraction,
    range: &Range<usize>,
) -> String {
    let mut resolved: Vec<String> = carried
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(name, value)| format!("- {name}: {}", render_value(value)))
        .collect();
    resolved.sort();

    let resolved_block = if resolved.is_empty() {
        "(no fields resolved yet)".to_string()
    } else {
        resolved.join("\n")
    };

    format!(
        "{instructions}\n\n\
         PREVIOUSLY EXTRACTED INFORMATION (from earlier pages):\n{resolved_block}\n\n\
         You are now reading pages {start}-{end} of the same document.\n\
         - Leave already-resolved fields unchanged unless these pages show better evidence\n\
         - If a value continues from earlier pages (e.g. a table spanning pages), return the completed value\n\
         - If these pages contradict an earlier value, return what these pages show\n\
         - Return null for fields with no new evidence on these pages",
        start = range.start + 1,
        end = range.end,
    )
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
