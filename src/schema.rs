//! Field schema and result model for document extraction.
//!
//! A caller describes what to pull out of a document as a list of named,
//! typed fields with natural-language hints. The pipeline answers with one
//! [`FieldResult`] per requested field (never more, never fewer, in request
//! order) plus a [`ProcessingSummary`].

use crate::error::{ExtractError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Expected data type of an extraction target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Date,
    Number,
    Boolean,
    Array,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Date => "date",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Array => "array",
        }
    }
}

/// One named extraction target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Natural-language extraction hint. May be empty, never absent.
    #[serde(default)]
    pub hint: String,
}

/// Caller-selected extraction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    VisionOnly,
    TextPlusVision,
    HybridConsensus,
}

impl StrategyMode {
    /// Parse the caller's mode string. Unknown modes fail before any
    /// backend call is made.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "vision_only" => Ok(Self::VisionOnly),
            "text_plus_vision" => Ok(Self::TextPlusVision),
            "hybrid_consensus" => Ok(Self::HybridConsensus),
            other => Err(ExtractError::InvalidStrategyMode(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VisionOnly => "vision_only",
            Self::TextPlusVision => "text_plus_vision",
            Self::HybridConsensus => "hybrid_consensus",
        }
    }
}

/// Agreement level assigned to an extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Which backend(s) produced the winning value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Vision,
    Text,
    Consensus,
}

/// Both original values, recorded when the reconciler had to break a tie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    pub vision_value: Value,
    pub text_value: Value,
}

/// One extracted value for one field, after all processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldResult {
    pub name: String,
    /// Extracted value, or `null` when not found. Never omitted.
    pub value: Value,
    pub confidence: Confidence,
    pub source: ValueSource,
    pub review_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<Disagreement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Completed,
    Partial,
    Failed,
}

/// Metadata about one completed extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub strategy_used: StrategyMode,
    pub status: ProcessingStatus,
    pub batch_count: u32,
    pub pages_processed: u32,
    /// Names of fields with `review_required = true`.
    pub review_flags: Vec<String>,
    /// Human-readable degradation reasons (empty on clean completion).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub processing_time_ms: u64,
}

/// Validate the field list: non-empty, identifier-shaped names, no duplicates.
pub fn validate_fields(fields: &[FieldSpec]) -> Result<()> {
    if fields.is_empty() {
        return Err(ExtractError::Invalid("at least one field is required".into()));
    }

    let mut seen = std::collections::HashSet::new();
    for field in fields {
        if !is_identifier(&field.name) {
            return Err(ExtractError::Invalid(format!(
                "field name '{}' must be an identifier (letters, digits, underscores)",
                field.name
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(ExtractError::Invalid(format!(
                "duplicate field name '{}'",
                field.name
            )));
        }
    }
    Ok(())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            data_type: DataType::String,
            hint: String::new(),
        }
    }

    #[test]
    fn test_strategy_mode_parse() {
        assert_eq!(
            StrategyMode::parse("hybrid_consensus").unwrap(),
            StrategyMode::HybridConsensus
        );
        assert_eq!(
            StrategyMode::parse("vision_only").unwrap(),
            StrategyMode::VisionOnly
        );
        assert!(matches!(
            StrategyMode::parse("dual_service"),
            Err(ExtractError::InvalidStrategyMode(_))
        ));
    }

    #[test]
    fn test_validate_fields_rejects_empty() {
        assert!(validate_fields(&[]).is_err());
    }

    #[test]
    fn test_validate_fields_rejects_duplicates() {
        let fields = vec![field("total"), field("total")];
        assert!(matches!(
            validate_fields(&fields),
            Err(ExtractError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_fields_rejects_bad_identifier() {
        let fields = vec![field("total amount")];
        assert!(validate_fields(&fields).is_err());
        let fields = vec![field("1total")];
        assert!(validate_fields(&fields).is_err());
    }

    #[test]
    fn test_validate_fields_accepts_valid() {
        let fields = vec![field("total_amount"), field("supplier_name"), field("_id2")];
        assert!(validate_fields(&fields).is_ok());
    }

    #[test]
    fn test_data_type_serde_snake_case() {
        let spec: FieldSpec =
            serde_json::from_str(r#"{"name":"due_date","type":"date","hint":"Due date"}"#).unwrap();
        assert_eq!(spec.data_type, DataType::Date);
        assert_eq!(spec.hint, "Due date");
    }
}
