//! Document source collaborator: resolves a caller-supplied reference into
//! raw bytes plus the declared content type.

use crate::error::{ExtractError, Result};
use tracing::info;

/// Fetched document bytes and the declared MIME type, when known.
pub struct FetchedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub declared_mime: Option<String>,
}

#[derive(Clone)]
pub struct DocumentSource {
    client: reqwest::Client,
}

impl DocumentSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch a document by reference: `http(s)` URLs are downloaded,
    /// anything else is treated as a local path.
    pub async fn fetch(&self, reference: &str) -> Result<FetchedDocument> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            self.fetch_url(reference).await
        } else {
            self.fetch_path(reference).await
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<FetchedDocument> {
        info!("Fetching document from URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::SourceUnavailable(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ExtractError::SourceUnavailable(format!(
                "HTTP {} from source",
                response.status()
            )));
        }

        let declared_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let filename = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("document")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractError::SourceUnavailable(format!("body read failed: {e}")))?
            .to_vec();

        Ok(FetchedDocument {
            filename,
            bytes,
            declared_mime,
        })
    }

    async fn fetch_path(&self, path: &str) -> Result<FetchedDocument> {
        info!("Reading document from path: {}", path);

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractError::SourceUnavailable(format!("cannot read {path}: {e}")))?;

        let filename = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();

        Ok(FetchedDocument {
            filename,
            bytes,
            declared_mime: None,
        })
    }
}
