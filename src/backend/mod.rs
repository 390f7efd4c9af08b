//! Polymorphic extraction backends.
//!
//! Two strategies implement one capability: given a page range, the field
//! specs, and general instructions, return a raw per-field mapping. The
//! vision backend works on rendered page images, the text backend on
//! OCR-analyzed page text. Adding a third strategy means implementing
//! [`ExtractionBackend`]; nothing downstream changes.
//!
//! Model output is parsed and shape-validated here, at the boundary: every
//! requested field is present in the result (null = not found), extraneous
//! keys are dropped, and anything that is not a single well-formed JSON
//! object is a `ModelError`.

pub mod text;
pub mod vision;

use crate::error::{ExtractError, Result};
use crate::schema::FieldSpec;
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;

/// Raw per-field extraction output. Always contains exactly the requested
/// field names; `Value::Null` is the not-found sentinel.
pub type RawExtraction = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Vision,
    Text,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Vision => "vision",
            BackendKind::Text => "text",
        }
    }
}

/// One extraction strategy, constructed per-request with its materials.
#[async_trait::async_trait]
pub trait ExtractionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Total pages of material this backend holds.
    fn page_count(&self) -> usize;

    /// Extract the requested fields from a contiguous page range.
    async fn extract(
        &self,
        pages: Range<usize>,
        fields: &[FieldSpec],
        instructions: &str,
    ) -> Result<RawExtraction>;
}

/// Build the system prompt shared by both backends: persona/context from the
/// caller plus the field contract.
pub(crate) fn build_system_prompt(fields: &[FieldSpec], instructions: &str) -> String {
    let mut fields_desc = String::from("Fields to extract:\n");
    for field in fields {
        fields_desc.push_str(&format!(
            "- {} ({}): {}\n",
            field.name,
            field.data_type.as_str(),
            field.hint
        ));
    }

    format!(
        "{instructions}\n\n{fields_desc}\n\
         Return ONLY a single JSON object whose keys are exactly the field names listed above. \
         Use null for any field that cannot be located. Do not add commentary, markdown, or any \
         keys that were not requested."
    )
}

/// Parse a model response into a raw extraction, enforcing the shape
/// contract against the requested fields.
pub(crate) fn parse_model_response(
    response: &str,
    fields: &[FieldSpec],
) -> Result<RawExtraction> {
    // Models occasionally wrap the object in a markdown fence despite the
    // contract; strip it before parsing.
    let json_str = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    };

    let parsed: Value = serde_json::from_str(json_str).map_err(|e| {
        ExtractError::ModelError(format!(
            "response is not valid JSON: {e}: {}",
            &json_str.chars().take(200).collect::<String>()
        ))
    })?;

    let obj = parsed.as_object().ok_or_else(|| {
        ExtractError::ModelError("response is not a single JSON object".to_string())
    })?;

    let mut result = RawExtraction::with_capacity(fields.len());
    for field in fields {
        let value = obj.get(&field.name).cloned().unwrap_or(Value::Null);
        result.insert(field.name.clone(), value);
    }

    let dropped = obj.keys().filter(|k| !result.contains_key(*k)).count();
    if dropped > 0 {
        debug!("Dropped {} unrequested key(s) from model response", dropped);
    }

    Ok(result)
}

/// An all-null result set, used when a backend degrades instead of aborting
/// the whole request.
pub fn null_extraction(fields: &[FieldSpec]) -> RawExtraction {
    fields
        .iter()
        .map(|f| (f.name.clone(), Value::Null))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

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

    #[test]
    fn test_parse_plain_object() {
        let out = parse_model_response(
            r#"{"total": "150000.00", "supplier": null}"#,
            &fields(&["total", "supplier"]),
        )
        .unwrap();
        assert_eq!(out["total"], "150000.00");
        assert_eq!(out["supplier"], Value::Null);
    }

    #[test]
    fn test_parse_strips_markdown_fence() {
        let response = "```json\n{\"total\": \"42\"}\n```";
        let out = parse_model_response(response, &fields(&["total"])).unwrap();
        assert_eq!(out["total"], "42");
    }

    #[test]
    fn test_parse_rejects_narration() {
        let response = "Sure! Here is the extraction: total is 42.";
        assert!(matches!(
            parse_model_response(response, &fields(&["total"])),
            Err(ExtractError::ModelError(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            parse_model_response(r#"["a", "b"]"#, &fields(&["total"])),
            Err(ExtractError::ModelError(_))
        ));
    }

    #[test]
    fn test_missing_keys_become_null_and_extras_dropped() {
        let out = parse_model_response(
            r#"{"total": "42", "bogus": true}"#,
            &fields(&["total", "supplier"]),
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["total"], "42");
        assert_eq!(out["supplier"], Value::Null);
        assert!(!out.contains_key("bogus"));
    }

    #[test]
    fn test_system_prompt_lists_fields() {
        let specs = vec![FieldSpec {
            name: "total_amount".to_string(),
            data_type: DataType::Number,
            hint: "Invoice grand total".to_string(),
        }];
        let prompt = build_system_prompt(&specs, "You are an invoice analyst.");
        assert!(prompt.contains("total_amount (number): Invoice grand total"));
        assert!(prompt.starts_with("You are an invoice analyst."));
        assert!(prompt.contains("Use null"));
    }
}
