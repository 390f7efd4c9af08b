//! Runtime settings, loaded once from the environment at startup.
//!
//! Everything tunable (batch threshold, retries, render resolution, model
//! concurrency) lives in an explicit struct passed down to the components
//! that need it, so tests can construct variants directly.

use anyhow::{Context, Result};
use std::env;

/// Cascade tuning, passed into the batch controller at construction.
#[derive(Debug, Clone, Copy)]
pub struct CascadeConfig {
    /// Max pages per model call; documents above this are cascaded.
    pub batch_threshold: usize,
    /// Extra attempts per failed batch (1 = retry once).
    pub batch_retries: u32,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 5,
            batch_retries: 1,
        }
    }
}

/// Page renderer tuning.
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    /// Rasterization resolution for PDF pages.
    pub dpi: f32,
    /// Longest edge cap in pixels; bounds payload size sent to the model.
    pub max_edge: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dpi: 150.0,
            max_edge: 2048,
        }
    }
}

/// All runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub openrouter_api_key: String,
    pub openrouter_model: String,
    /// Max in-flight model calls across all requests.
    pub model_concurrency: usize,
    pub docling_url: String,
    /// Result sink (optional; no persistence when unset).
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub cascade: CascadeConfig,
    pub render: RenderConfig,
}

impl Settings {
    /// Load settings from environment variables (after `dotenvy::dotenv()`).
    pub fn from_env() -> Result<Self> {
        let openrouter_api_key = env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable not set")?;

        let cascade = CascadeConfig {
            batch_threshold: parse_env("BATCH_THRESHOLD", 5)?,
            batch_retries: parse_env("BATCH_RETRIES", 1)?,
        };

        let render = RenderConfig {
            dpi: parse_env("RENDER_DPI", 150.0)?,
            max_edge: parse_env("RENDER_MAX_EDGE", 2048)?,
        };

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            openrouter_api_key,
            openrouter_model: env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| "google/gemini-3-flash-preview".to_string()),
            model_concurrency: parse_env("MODEL_CONCURRENCY", 4)?,
            docling_url: env::var("DOCLING_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            supabase_url: env::var("SUPABASE_URL").ok(),
            supabase_key: env::var("SUPABASE_SERVICE_KEY").ok(),
            cascade,
            render,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}
