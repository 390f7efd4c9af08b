//! Orchestration facade: top-level entry point for one extraction request.
//!
//! Selects which backends run for the requested strategy mode, drives each
//! through the cascade controller, reconciles dual-backend output, and emits
//! the final ordered field results plus a processing summary. The two
//! backends in dual modes have no data dependency and run concurrently;
//! batches within one backend stay strictly sequential (the cascade carries
//! state between them).

use crate::backend::{null_extraction, ExtractionBackend, RawExtraction};
use crate::cascade::{CascadeController, CascadeOutcome};
use crate::config::CascadeConfig;
use crate::consensus;
use crate::error::{ExtractError, Result};
use crate::schema::{
    validate_fields, Confidence, FieldResult, FieldSpec, ProcessingStatus, ProcessingSummary,
    StrategyMode, ValueSource,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

/// One unit of extraction work, owned by the task processing it.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub fields: Vec<FieldSpec>,
    pub general_instructions: String,
    pub strategy_mode: StrategyMode,
    pub deadline: Option<Instant>,
}

/// Terminal output of the facade.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    /// One result per requested field, in request order.
    pub results: Vec<FieldResult>,
    pub summary: ProcessingSummary,
}

pub struct Orchestrator {
    cascade: CascadeController,
}

impl Orchestrator {
    pub fn new(config: CascadeConfig) -> Self {
        Self {
            cascade: CascadeController::new(config),
        }
    }

    /// Process one request. Callers only construct (and pay for OCR on) the
    /// backends the mode needs; a `None` text backend in a dual mode means
    /// document analysis already failed persistently, and that side degrades
    /// to nulls.
    pub async fn run(
        &self,
        request: &ExtractionRequest,
        vision: &dyn ExtractionBackend,
        text: Option<&dyn ExtractionBackend>,
    ) -> Result<ExtractionOutput> {
        validate_fields(&request.fields)?;
        if vision.page_count() == 0 {
            return Err(ExtractError::Invalid("document has no pages".into()));
        }

        let started = std::time::Instant::now();
        info!(
            "Processing extraction: {} field(s), {} page(s), mode {}",
            request.fields.len(),
            vision.page_count(),
            request.strategy_mode.as_str()
        );

        let output = match request.strategy_mode {
            StrategyMode::VisionOnly => self.run_vision_only(request, vision).await?,
            StrategyMode::TextPlusVision => self.run_dual(request, vision, text, false).await?,
            StrategyMode::HybridConsensus => self.run_dual(request, vision, text, true).await?,
        };

        let mut output = output;
        output.summary.processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            "Extraction finished: status {:?}, {} batch(es), {} review flag(s)",
            output.summary.status,
            output.summary.batch_count,
            output.summary.review_flags.len()
        );
        Ok(output)
    }

    async fn run_vision_only(
        &self,
        request: &ExtractionRequest,
        vision: &dyn ExtractionBackend,
    ) -> Result<ExtractionOutput> {
        let outcome = self
            .cascade
            .run(vision, &request.fields, &request.general_instructions, request.deadline)
            .await
            // Sole backend: persistent failure fails the request.
            .map_err(|e| ExtractError::ExtractionBackendError(e.reason()))?;

        let results: Vec<FieldResult> = request
            .fields
            .iter()
            .map(|spec| {
                let value = outcome.fields.get(&spec.name).cloned().unwrap_or(Value::Null);
                let confidence = if value.is_null() {
                    Confidence::Low
                } else {
                    Confidence::High
                };
                FieldResult {
                    name: spec.name.clone(),
                    value,
                    confidence,
                    source: ValueSource::Vision,
                    review_required: false,
                    audit: None,
                }
            })
            .collect();

        let summary = build_summary(
            request,
            &results,
            outcome.batch_count,
            vision.page_count(),
            outcome.complete,
            outcome.failures,
        );
        Ok(ExtractionOutput { results, summary })
    }

    async fn run_dual(
        &self,
        request: &ExtractionRequest,
        vision: &dyn ExtractionBackend,
        text: Option<&dyn ExtractionBackend>,
        reconcile: bool,
    ) -> Result<ExtractionOutput> {
        let mut errors = Vec::new();

        // The two backends are independent network-bound calls; run them
        // concurrently.
        let (vision_side, text_side) = match text {
            Some(text) => {
                let (vision_run, text_run) = tokio::join!(
                    self.cascade.run(
                        vision,
                        &request.fields,
                        &request.general_instructions,
                        request.deadline
                    ),
                    self.cascade.run(
                        text,
                        &request.fields,
                        &request.general_instructions,
                        request.deadline
                    ),
                );
                (
                    degrade_on_failure(vision_run, "vision", &request.fields, &mut errors),
                    degrade_on_failure(text_run, "text", &request.fields, &mut errors),
                )
            }
            None => {
                warn!("Text backend unavailable; running vision side only");
                errors.push(
                    "text extraction unavailable: document analysis failed".to_string(),
                );
                let vision_run = self
                    .cascade
                    .run(
                        vision,
                        &request.fields,
                        &request.general_instructions,
                        request.deadline,
                    )
                    .await;
                (
                    degrade_on_failure(vision_run, "vision", &request.fields, &mut errors),
                    CascadeOutcome {
                        fields: null_extraction(&request.fields),
                        batch_count: 0,
                        complete: false,
                        failures: Vec::new(),
                    },
                )
            }
        };

        let results = if reconcile {
            consensus::reconcile(&request.fields, &vision_side.fields, &text_side.fields)
        } else {
            prefer_vision(&request.fields, &vision_side.fields, &text_side.fields)
        };

        let complete = vision_side.complete && text_side.complete && errors.is_empty();
        let mut failures = errors;
        failures.extend(vision_side.failures.clone());
        failures.extend(text_side.failures.clone());

        let summary = build_summary(
            request,
            &results,
            vision_side.batch_count.max(text_side.batch_count),
            vision
                .page_count()
                .max(text.map(|t| t.page_count()).unwrap_or(0)),
            complete,
            failures,
        );
        Ok(ExtractionOutput { results, summary })
    }
}

/// In dual modes a persistently failing backend degrades to all-null instead
/// of aborting the request.
fn degrade_on_failure(
    run: Result<CascadeOutcome>,
    side: &str,
    fields: &[FieldSpec],
    errors: &mut Vec<String>,
) -> CascadeOutcome {
    match run {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("{side} backend degraded to null results: {e}");
            errors.push(format!("{side} extraction unavailable: {}", e.reason()));
            CascadeOutcome {
                fields: null_extraction(fields),
                batch_count: 0,
                complete: false,
                failures: Vec::new(),
            }
        }
    }
}

/// `text_plus_vision` merge: prefer the vision value when present, else the
/// text value. No cross-validation is claimed, so nothing is review-flagged.
fn prefer_vision(
    fields: &[FieldSpec],
    vision: &RawExtraction,
    text: &RawExtraction,
) -> Vec<FieldResult> {
    fields
        .iter()
        .map(|spec| {
            let v = vision.get(&spec.name).cloned().unwrap_or(Value::Null);
            let t = text.get(&spec.name).cloned().unwrap_or(Value::Null);
            let (value, source) = if !v.is_null() {
                (v, ValueSource::Vision)
            } else if !t.is_null() {
                (t, ValueSource::Text)
            } else {
                (Value::Null, ValueSource::Consensus)
            };
            let confidence = if value.is_null() {
                Confidence::Low
            } else {
                Confidence::Medium
            };
            FieldResult {
                name: spec.name.clone(),
                value,
                confidence,
                source,
                review_required: false,
                audit: None,
            }
        })
        .collect()
}

fn build_summary(
    request: &ExtractionRequest,
    results: &[FieldResult],
    batch_count: u32,
    pages: usize,
    complete: bool,
    errors: Vec<String>,
) -> ProcessingSummary {
    let review_flags: Vec<String> = results
        .iter()
        .filter(|r| r.review_required)
        .map(|r| r.name.clone())
        .collect();

    let mut errors = errors;
    if !complete && errors.is_empty() {
        errors.push("deadline reached before all pages were examined".to_string());
    }

    let status = if complete && errors.is_empty() {
        ProcessingStatus::Completed
    } else {
        ProcessingStatus::Partial
    };

    ProcessingSummary {
        strategy_used: request.strategy_mode,
        status,
        batch_count,
        pages_processed: pages as u32,
        review_flags,
        errors,
        processing_time_ms: 0, // filled in by the caller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::schema::DataType;
    use serde_json::json;
    use std::collections::HashMap;
    use std::ops::Range;

    fn fields(names: &[&str]) -> Vec<FieldSpec> {
        names
            .iter()
            .map(|n| FieldSpec {
                name: n.to_string(),
                data_type: DataType::String,
                hint: String::new(),
            })
            .collect()
    }

    fn request(names: &[&str], mode: StrategyMode) -> ExtractionRequest {
        ExtractionRequest {
            fields: fields(names),
            general_instructions: "extract".to_string(),
            strategy_mode: mode,
            deadline: None,
        }
    }

    /// Backend that always answers with the same mapping (or always fails).
    struct FixedBackend {
        kind: BackendKind,
        pages: usize,
        answer: Option<HashMap<String, Value>>,
    }

    impl FixedBackend {
        fn vision(pairs: &[(&str, Value)]) -> Self {
            Self {
                kind: BackendKind::Vision,
                pages: 3,
                answer: Some(to_map(pairs)),
            }
        }

        fn text(pairs: &[(&str, Value)]) -> Self {
            Self {
                kind: BackendKind::Text,
                pages: 3,
                answer: Some(to_map(pairs)),
            }
        }

        fn failing(kind: BackendKind) -> Self {
            Self {
                kind,
                pages: 3,
                answer: None,
            }
        }
    }

    fn to_map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[async_trait::async_trait]
    impl ExtractionBackend for FixedBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn page_count(&self) -> usize {
            self.pages
        }

        async fn extract(
            &self,
            _pages: Range<usize>,
            _fields: &[FieldSpec],
            _instructions: &str,
        ) -> Result<RawExtraction> {
            self.answer
                .clone()
                .ok_or_else(|| ExtractError::ModelError("down".into()))
        }
    }

    #[tokio::test]
    async fn test_output_covers_fields_in_request_order() {
        let req = request(&["b", "a", "c"], StrategyMode::VisionOnly);
        let vision =
            FixedBackend::vision(&[("a", json!(1)), ("b", json!(2)), ("c", Value::Null)]);
        let orchestrator = Orchestrator::new(CascadeConfig::default());

        let out = orchestrator.run(&req, &vision, None).await.unwrap();
        let names: Vec<_> = out.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_vision_only_confidence_wrapping() {
        let req = request(&["found", "missing"], StrategyMode::VisionOnly);
        let vision = FixedBackend::vision(&[("found", json!("x")), ("missing", Value::Null)]);
        let orchestrator = Orchestrator::new(CascadeConfig::default());

        let out = orchestrator.run(&req, &vision, None).await.unwrap();
        assert_eq!(out.results[0].confidence, Confidence::High);
        assert_eq!(out.results[1].confidence, Confidence::Low);
        assert!(out.results.iter().all(|r| !r.review_required));
        assert!(out
            .results
            .iter()
            .all(|r| r.source == ValueSource::Vision));
        assert_eq!(out.summary.status, ProcessingStatus::Completed);
        assert_eq!(out.summary.batch_count, 1);
    }

    #[tokio::test]
    async fn test_vision_only_sole_backend_failure_fails_request() {
        let req = request(&["a"], StrategyMode::VisionOnly);
        let vision = FixedBackend::failing(BackendKind::Vision);
        let orchestrator = Orchestrator::new(CascadeConfig::default());

        let err = orchestrator.run(&req, &vision, None).await.unwrap_err();
        assert!(matches!(err, ExtractError::ExtractionBackendError(_)));
    }

    #[tokio::test]
    async fn test_text_plus_vision_prefers_vision() {
        let req = request(&["a", "b", "c"], StrategyMode::TextPlusVision);
        let vision = FixedBackend::vision(&[
            ("a", json!("vision-a")),
            ("b", Value::Null),
            ("c", Value::Null),
        ]);
        let text = FixedBackend::text(&[
            ("a", json!("text-a")),
            ("b", json!("text-b")),
            ("c", Value::Null),
        ]);
        let orchestrator = Orchestrator::new(CascadeConfig::default());

        let out = orchestrator.run(&req, &vision, Some(&text)).await.unwrap();
        assert_eq!(out.results[0].value, json!("vision-a"));
        assert_eq!(out.results[0].source, ValueSource::Vision);
        assert_eq!(out.results[1].value, json!("text-b"));
        assert_eq!(out.results[1].source, ValueSource::Text);
        assert!(out.results[2].value.is_null());
        assert!(out.results.iter().all(|r| !r.review_required));
        assert_eq!(out.summary.status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn test_hybrid_consensus_flags_disagreement() {
        let req = request(&["total"], StrategyMode::HybridConsensus);
        let vision = FixedBackend::vision(&[("total", json!("100"))]);
        let text = FixedBackend::text(&[("total", json!("999"))]);
        let orchestrator = Orchestrator::new(CascadeConfig::default());

        let out = orchestrator.run(&req, &vision, Some(&text)).await.unwrap();
        assert_eq!(out.results[0].value, json!("100"));
        assert!(out.results[0].review_required);
        assert_eq!(out.summary.review_flags, vec!["total".to_string()]);
    }

    #[tokio::test]
    async fn test_dual_mode_degrades_when_one_side_fails() {
        let req = request(&["a"], StrategyMode::HybridConsensus);
        let vision = FixedBackend::vision(&[("a", json!("v"))]);
        let text = FixedBackend::failing(BackendKind::Text);
        let orchestrator = Orchestrator::new(CascadeConfig::default());

        let out = orchestrator.run(&req, &vision, Some(&text)).await.unwrap();
        // Vision value survives; the failed side degrades to nulls.
        assert_eq!(out.results[0].value, json!("v"));
        assert_eq!(out.results[0].source, ValueSource::Vision);
        assert_eq!(out.summary.status, ProcessingStatus::Partial);
        assert!(!out.summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_dual_mode_without_text_backend_is_partial() {
        let req = request(&["a"], StrategyMode::TextPlusVision);
        let vision = FixedBackend::vision(&[("a", json!("v"))]);
        let orchestrator = Orchestrator::new(CascadeConfig::default());

        let out = orchestrator.run(&req, &vision, None).await.unwrap();
        assert_eq!(out.results[0].value, json!("v"));
        assert_eq!(out.summary.status, ProcessingStatus::Partial);
        assert!(out.summary.errors[0].contains("text extraction unavailable"));
    }

    #[tokio::test]
    async fn test_invalid_fields_fail_before_backend_calls() {
        let req = request(&[], StrategyMode::VisionOnly);
        let vision = FixedBackend::vision(&[]);
        let orchestrator = Orchestrator::new(CascadeConfig::default());

        assert!(matches!(
            orchestrator.run(&req, &vision, None).await,
            Err(ExtractError::Invalid(_))
        ));
    }
}
