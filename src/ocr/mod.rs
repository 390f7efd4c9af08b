//! Document-analysis (OCR) collaborator abstraction.
//!
//! Defines the [`OcrProvider`] trait and unified types so different analysis
//! backends can be swapped without touching the text extraction path.

pub mod docling;

use crate::error::Result;

/// Per-page analyzed text (always 1-indexed).
#[derive(Debug, Clone)]
pub struct OcrPage {
    pub page_num: u32,
    pub text: String,
}

/// Unified analysis result returned by every provider.
#[derive(Debug, Clone)]
pub struct OcrDocument {
    /// Whole-document text/layout rendering (markdown).
    pub markdown: String,
    pub pages: Vec<OcrPage>,
    pub total_pages: u32,
}

/// Async trait implemented by each analysis backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Analyze raw document bytes into text plus per-page layout.
    async fn analyze(&self, filename: &str, data: &[u8]) -> Result<OcrDocument>;
}
