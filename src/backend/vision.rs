//! Vision extraction backend: page images straight to the model.

use super::{
    build_system_prompt, parse_model_response, BackendKind, ExtractionBackend, RawExtraction,
};
use crate::error::Result;
use crate::openrouter::{Message, OpenRouterClient};
use crate::render::PageImage;
use crate::schema::FieldSpec;
use std::ops::Range;
use tracing::debug;

pub struct VisionBackend {
    client: OpenRouterClient,
    pages: Vec<PageImage>,
}

impl VisionBackend {
    pub fn new(client: OpenRouterClient, pages: Vec<PageImage>) -> Self {
        Self { client, pages }
    }
}

#[async_trait::async_trait]
impl ExtractionBackend for VisionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vision
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
            "Vision backend: extracting {} field(s) from pages {}-{}",
            fields.len(),
            pages.start + 1,
            pages.end
        );

        let system = build_system_prompt(fields, instructions);
        let user_text = format!(
            "You are looking at {count} page image(s) of the same document (pages {start}-{end}). \
             Read every page before answering. If a field appears on several pages, use the most \
             complete information; return null only if the field appears on none of them.",
            count = batch.len(),
            start = pages.start + 1,
            end = pages.end,
        );

        let messages = vec![
            Message::system(system),
            Message::user_with_images(user_text, batch.iter().map(|p| p.png.as_slice())),
        ];

        let response = self.client.chat(messages).await?;
        parse_model_response(&response, fields)
    }
}
