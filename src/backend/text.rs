//! Text extraction backend: OCR-analyzed page text to the model.

use super::{
    build_system_prompt, parse_model_response, BackendKind, ExtractionBackend, RawExtraction,
};
use crate::error::Result;
use crate::ocr::OcrPage;
use crate::openrouter::{Message, OpenRouterClient};
use crate::schema::FieldSpec;
use std::ops::Range;
use tracing::debug;

pub struct TextBackend {
    client: OpenRouterClient,
    pages: Vec<OcrPage>,
}

impl TextBackend {
    pub fn new(client: OpenRouterClient, pages: Vec<OcrPage>) -> Self {
        Self { client, pages }
    }
}

#[async_trait::async_trait]
impl ExtractionBackend for TextBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Text
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn extract(
        &self,
        pages: Range<usize>,
        fields: &[FieldSpec],
        instructions: &str,
    ) -> Result<RawExtraction> {
        let batch = &self.pages[pages.clone()];
        debug!(
            "Text backend: extracting {} field(s) from pages {}-{}",
            fields.len(),
            pages.start + 1,
            pages.end
        );

        let document = batch
            .iter()
            .map(|p| format!("--- Page {} ---\n{}", p.page_num, p.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let system = build_system_prompt(fields, instructions);
        let user = format!(
            "Document text (pages {start}-{end}, from layout analysis):\n\n{document}\n\n\
             Extract the requested fields from the text above.",
            start = pages.start + 1,
            end = pages.end,
        );

        let messages = vec![Message::system(system), Message::user(user)];

        let response = self.client.chat(messages).await?;
        parse_model_response(&response, fields)
    }
}
