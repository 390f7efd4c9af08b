//! Result sink collaborator: hands finished extractions to persistence.
//!
//! The core calls `persist` exactly once per completed request and never
//! retries; delivery guarantees beyond that are the sink's concern. A
//! persistence failure is logged and reported in the summary path only by
//! the caller, never by failing the extraction itself.

use crate::schema::{FieldResult, ProcessingSummary};
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(
        &self,
        document_id: &str,
        results: &[FieldResult],
        summary: &ProcessingSummary,
    ) -> Result<()>;
}

/// Supabase REST sink: one row per extraction in the `extractions` table.
#[derive(Clone)]
pub struct SupabaseSink {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseSink {
    pub fn new(client: Client, base_url: String, service_role_key: String) -> Self {
        Self {
            client,
            base_url,
            service_role_key,
        }
    }
}

#[async_trait::async_trait]
impl ResultSink for SupabaseSink {
    async fn persist(
        &self,
        document_id: &str,
        results: &[FieldResult],
        summary: &ProcessingSummary,
    ) -> Result<()> {
        let url = format!("{}/rest/v1/extractions", self.base_url);

        let body = json!({
            "document_id": document_id,
            "strategy_used": summary.strategy_used,
            "status": summary.status,
            "batch_count": summary.batch_count,
            "pages_processed": summary.pages_processed,
            "review_flags": summary.review_flags,
            "processing_time_ms": summary.processing_time_ms,
            "fields": results,
        });

        debug!("Persisting extraction for document {}", document_id);

        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("failed to persist extraction: {status} - {text}"));
        }

        info!("Persisted extraction for document {}", document_id);
        Ok(())
    }
}

/// Sink used when no persistence backend is configured.
pub struct NoopSink;

#[async_trait::async_trait]
impl ResultSink for NoopSink {
    async fn persist(
        &self,
        document_id: &str,
        _results: &[FieldResult],
        _summary: &ProcessingSummary,
    ) -> Result<()> {
        debug!("No sink configured; dropping result for {}", document_id);
        Ok(())
    }
}
