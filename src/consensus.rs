//! Consensus reconciler: combines the vision-path and text-path raw
//! extractions into one confidence-annotated result set.
//!
//! Pure per-field state machine, no state between fields:
//! 1. both null            -> null, low, consensus
//! 2. exactly one non-null -> that value, medium, its backend
//! 3. equal (normalized)   -> the value, high, consensus
//! 4. unequal              -> vision value (vision sees full page layout and
//!    is the documented tie-break authority), medium, review flagged, both
//!    originals recorded for audit.
//!
//! Equality is value-normalized: strings are trimmed and case-folded,
//! numbers are compared after stripping currency symbols and thousands
//! separators. When both paths agree, the more complete original literal is
//! adopted ("150000.00" over "150000"); vision wins length ties.

use crate::backend::RawExtraction;
use crate::schema::{Confidence, Disagreement, FieldResult, FieldSpec, ValueSource};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Reconcile two raw per-field mappings into final field results, in field
/// spec order.
pub fn reconcile(
    fields: &[FieldSpec],
    vision: &RawExtraction,
    text: &RawExtraction,
) -> Vec<FieldResult> {
    fields
        .iter()
        .map(|spec| {
            let v = vision.get(&spec.name).cloned().unwrap_or(Value::Null);
            let t = text.get(&spec.name).cloned().unwrap_or(Value::Null);
            reconcile_field(&spec.name, v, t)
        })
        .collect()
}

fn reconcile_field(name: &str, vision: Value, text: Value) -> FieldResult {
    match (vision.is_null(), text.is_null()) {
        (true, true) => FieldResult {
            name: name.to_string(),
            value: Value::Null,
            confidence: Confidence::Low,
            source: ValueSource::Consensus,
            review_required: false,
            audit: None,
        },
        (false, true) => FieldResult {
            name: name.to_string(),
            value: vision,
            confidence: Confidence::Medium,
            source: ValueSource::Vision,
            review_required: false,
            audit: None,
        },
        (true, false) => FieldResult {
            name: name.to_string(),
            value: text,
            confidence: Confidence::Medium,
            source: ValueSource::Text,
            review_required: false,
            audit: None,
        },
        (false, false) => {
            if values_agree(&vision, &text) {
                FieldResult {
                    name: name.to_string(),
                    value: canonical(vision, text),
                    confidence: Confidence::High,
                    source: ValueSource::Consensus,
                    review_required: false,
                    audit: None,
                }
            } else {
                FieldResult {
                    name: name.to_string(),
                    value: vision.clone(),
                    confidence: Confidence::Medium,
                    source: ValueSource::Vision,
                    review_required: true,
                    audit: Some(Disagreement {
                        vision_value: vision,
                        text_value: text,
                    }),
                }
            }
        }
    }
}

/// Normalized form of a value, used only for equality checks.
#[derive(Debug, PartialEq)]
enum Normalized {
    Num(f64),
    Text(String),
    Bool(bool),
    Structural(Value),
}

fn normalize(value: &Value) -> Normalized {
    match value {
        Value::Number(n) => Normalized::Num(n.as_f64().unwrap_or(f64::NAN)),
        Value::Bool(b) => Normalized::Bool(*b),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(n) = parse_numeric(trimmed) {
                return Normalized::Num(n);
            }
            match trimmed.to_lowercase().as_str() {
                "true" => Normalized::Bool(true),
                "false" => Normalized::Bool(false),
                other => Normalized::Text(other.to_string()),
            }
        }
        other => Normalized::Structural(other.clone()),
    }
}

fn values_agree(a: &Value, b: &Value) -> bool {
    match (normalize(a), normalize(b)) {
        (Normalized::Num(x), Normalized::Num(y)) => (x - y).abs() < 1e-9,
        (x, y) => x == y,
    }
}

/// Conservative numeric parse: strip currency symbols, whitespace and
/// thousands separators, then parse as decimal. Handles both `1,500.00`
/// and `1.500,00` conventions.
fn parse_numeric(s: &str) -> Option<f64> {
    static CURRENCY: OnceLock<Regex> = OnceLock::new();
    let currency =
        CURRENCY.get_or_init(|| Regex::new(r"(?i)^(R\$|US\$|[$€£¥])|(USD|EUR|BRL)\s*").unwrap());

    let stripped = currency.replace_all(s.trim(), "");
    let stripped = stripped.replace(' ', "");
    if stripped.is_empty() {
        return None;
    }

    let cleaned = if stripped.contains(',') && stripped.contains('.') {
        if stripped.rfind(',') > stripped.rfind('.') {
            // 1.500,00: dots are thousands, comma is decimal
            stripped.replace('.', "").replace(',', ".")
        } else {
            // 1,500.00: commas are thousands
            stripped.replace(',', "")
        }
    } else if let Some(pos) = stripped.rfind(',') {
        // Comma only: decimal comma if followed by exactly two digits,
        // thousands separator otherwise.
        if stripped.len() - pos == 3 && stripped.matches(',').count() == 1 {
            stripped.replacen(',', ".", 1)
        } else {
            stripped.replace(',', "")
        }
    } else {
        stripped
    };

    cleaned.parse::<f64>().ok()
}

/// Pick the value to adopt when both paths agree: the more complete original
/// literal, vision on ties.
fn canonical(vision: Value, text: Value) -> Value {
    if literal_len(&text) > literal_len(&vision) {
        text
    } else {
        vision
    }
}

fn literal_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.trim().len(),
        other => other.to_string().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use serde_json::json;

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

    fn raw(pairs: &[(&str, Value)]) -> RawExtraction {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_both_null_is_low_consensus() {
        let results = reconcile(
            &fields(&["total"]),
            &raw(&[("total", Value::Null)]),
            &raw(&[("total", Value::Null)]),
        );
        let r = &results[0];
        assert!(r.value.is_null());
        assert_eq!(r.confidence, Confidence::Low);
        assert_eq!(r.source, ValueSource::Consensus);
        assert!(!r.review_required);
    }

    #[test]
    fn test_single_source_is_medium() {
        let results = reconcile(
            &fields(&["supplier_name"]),
            &raw(&[("supplier_name", json!("Acme Corp"))]),
            &raw(&[("supplier_name", Value::Null)]),
        );
        let r = &results[0];
        assert_eq!(r.value, json!("Acme Corp"));
        assert_eq!(r.confidence, Confidence::Medium);
        assert_eq!(r.source, ValueSource::Vision);
        assert!(!r.review_required);

        // Mirror case: only the text path found it.
        let results = reconcile(
            &fields(&["supplier_name"]),
            &raw(&[("supplier_name", Value::Null)]),
            &raw(&[("supplier_name", json!("Acme Corp"))]),
        );
        assert_eq!(results[0].source, ValueSource::Text);
        assert_eq!(results[0].confidence, Confidence::Medium);
    }

    #[test]
    fn test_numeric_agreement_adopts_canonical() {
        // The invoice example: "150000" vs "150000.00" are normalized-equal;
        // the more complete literal is adopted.
        let results = reconcile(
            &fields(&["total_amount"]),
            &raw(&[("total_amount", json!("150000"))]),
            &raw(&[("total_amount", json!("150000.00"))]),
        );
        let r = &results[0];
        assert_eq!(r.value, json!("150000.00"));
        assert_eq!(r.confidence, Confidence::High);
        assert_eq!(r.source, ValueSource::Consensus);
        assert!(!r.review_required);
    }

    #[test]
    fn test_string_agreement_is_case_insensitive() {
        let results = reconcile(
            &fields(&["supplier"]),
            &raw(&[("supplier", json!("ACME CORP"))]),
            &raw(&[("supplier", json!("  acme corp "))]),
        );
        assert_eq!(results[0].confidence, Confidence::High);
        // Equal trimmed lengths: vision wins the tie.
        assert_eq!(results[0].value, json!("ACME CORP"));
    }

    #[test]
    fn test_disagreement_vision_wins_with_audit() {
        let results = reconcile(
            &fields(&["due_date"]),
            &raw(&[("due_date", json!("2026-03-01"))]),
            &raw(&[("due_date", json!("2026-03-10"))]),
        );
        let r = &results[0];
        assert_eq!(r.value, json!("2026-03-01"));
        assert_eq!(r.confidence, Confidence::Medium);
        assert_eq!(r.source, ValueSource::Vision);
        assert!(r.review_required);
        let audit = r.audit.as_ref().unwrap();
        assert_eq!(audit.vision_value, json!("2026-03-01"));
        assert_eq!(audit.text_value, json!("2026-03-10"));
    }

    #[test]
    fn test_results_follow_field_order() {
        let specs = fields(&["c", "a", "b"]);
        let v = raw(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))]);
        let results = reconcile(&specs, &v, &v);
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_parse_numeric_currency_and_separators() {
        assert_eq!(parse_numeric("$1,500.00"), Some(1500.0));
        assert_eq!(parse_numeric("R$ 1.500,00"), Some(1500.0));
        assert_eq!(parse_numeric("€1 500,00"), Some(1500.0));
        assert_eq!(parse_numeric("150000.00"), Some(150000.0));
        assert_eq!(parse_numeric("1,500"), Some(1500.0));
        assert_eq!(parse_numeric("12,34"), Some(12.34));
        assert_eq!(parse_numeric("not a number"), None);
    }

    #[test]
    fn test_number_vs_string_agreement() {
        let results = reconcile(
            &fields(&["total"]),
            &raw(&[("total", json!(1500))]),
            &raw(&[("total", json!("$1,500.00"))]),
        );
        assert_eq!(results[0].confidence, Confidence::High);
        assert_eq!(results[0].value, json!("$1,500.00"));
    }

    #[test]
    fn test_boolean_string_agreement() {
        let results = reconcile(
            &fields(&["signed"]),
            &raw(&[("signed", json!(true))]),
            &raw(&[("signed", json!("True"))]),
        );
        assert_eq!(results[0].confidence, Confidence::High);
    }

    #[test]
    fn test_array_disagreement_flags_review() {
        let results = reconcile(
            &fields(&["line_items"]),
            &raw(&[("line_items", json!(["a", "b"]))]),
            &raw(&[("line_items", json!(["a"]))]),
        );
        assert!(results[0].review_required);
        assert_eq!(results[0].value, json!(["a", "b"]));
    }
}
