//! Docling sidecar analysis provider.

use super::{OcrDocument, OcrPage, OcrProvider};
use crate::error::{ExtractError, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct DoclingResponse {
    markdown: String,
    pages: Vec<DoclingPageContent>,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct DoclingPageContent {
    page_num: u32,
    text: String,
}

pub struct DoclingProvider {
    url: String,
    client: reqwest::Client,
}

impl DoclingProvider {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { url, client }
    }
}

#[async_trait::async_trait]
impl OcrProvider for DoclingProvider {
    fn name(&self) -> &str {
        "docling"
    }

    async fn analyze(&self, filename: &str, data: &[u8]) -> Result<OcrDocument> {
        use reqwest::multipart::{Form, Part};

        let part = Part::bytes(data.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ExtractError::AnalysisError(format!("bad filename: {e}")))?;

        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/convert", self.url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractError::AnalysisError(format!("sidecar unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractError::AnalysisError(format!(
                "Docling sidecar error ({status}): {error_text}"
            )));
        }

        let docling: DoclingResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::AnalysisError(format!("malformed sidecar response: {e}")))?;

        Ok(OcrDocument {
            markdown: docling.markdown,
            pages: docling
                .pages
                .into_iter()
                .map(|p| OcrPage {
                    page_num: p.page_num,
                    text: p.text,
                })
                .collect(),
            total_pages: docling.total_pages,
        })
    }
}
