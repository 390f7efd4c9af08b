//! IDP extractor - multi-strategy document extraction server.

mod backend;
mod cascade;
mod config;
mod consensus;
mod error;
mod ocr;
mod openrouter;
mod orchestrator;
mod render;
mod schema;
mod sink;
mod source;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use backend::{text::TextBackend, vision::VisionBackend};
use config::Settings;
use error::{ExtractError, Result};
use ocr::{docling::DoclingProvider, OcrProvider};
use openrouter::OpenRouterClient;
use orchestrator::{ExtractionRequest, Orchestrator};
use render::PageRenderer;
use schema::{FieldResult, FieldSpec, ProcessingSummary, StrategyMode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sink::{NoopSink, ResultSink, SupabaseSink};
use source::DocumentSource;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    renderer: PageRenderer,
    source: DocumentSource,
    openrouter: OpenRouterClient,
    ocr: Arc<dyn OcrProvider>,
    orchestrator: Arc<Orchestrator>,
    sink: Arc<dyn ResultSink>,
    results: Arc<RwLock<HashMap<String, ProcessResponse>>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "idp_extractor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    let http = reqwest::Client::new();

    let openrouter = OpenRouterClient::new(
        http.clone(),
        settings.openrouter_api_key.clone(),
        settings.openrouter_model.clone(),
        settings.model_concurrency,
    );
    info!("OpenRouter client initialized (model: {})", settings.openrouter_model);

    let ocr: Arc<dyn OcrProvider> = Arc::new(DoclingProvider::new(
        http.clone(),
        settings.docling_url.clone(),
    ));

    let sink: Arc<dyn ResultSink> = match (&settings.supabase_url, &settings.supabase_key) {
        (Some(url), Some(key)) => {
            info!("Result sink: Supabase at {}", url);
            Arc::new(SupabaseSink::new(http.clone(), url.clone(), key.clone()))
        }
        _ => {
            info!("Result sink: none configured");
            Arc::new(NoopSink)
        }
    };

    let state = AppState {
        renderer: PageRenderer::new(settings.render),
        source: DocumentSource::new(http),
        openrouter,
        ocr,
        orchestrator: Arc::new(Orchestrator::new(settings.cascade)),
        sink,
        results: Arc::new(RwLock::new(HashMap::new())),
        settings: Arc::new(settings),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/process", post(process_document))
        .route("/process/upload", post(process_upload))
        .route("/results/:job_id", get(get_result))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024)) // 100MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&state.settings.bind_addr).await?;
    info!("Server listening on http://{}", state.settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Request/response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    source_reference: String,
    strategy_mode: String,
    #[serde(default)]
    general_instructions: String,
    fields: Vec<FieldSpec>,
    /// Overall processing deadline; expiry yields a partial result.
    deadline_ms: Option<u64>,
    correlation_id: Option<String>,
}

/// Upload variant: the document arrives as a multipart `file` part, so there
/// is no source reference.
#[derive(Debug, Deserialize)]
struct UploadRequest {
    strategy_mode: String,
    #[serde(default)]
    general_instructions: String,
    fields: Vec<FieldSpec>,
    deadline_ms: Option<u64>,
    correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ProcessResponse {
    job_id: String,
    document_id: String,
    extraction_data: Vec<FieldResult>,
    processing_summary: ProcessingSummary,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

/// Process a document given a source reference (URL or path).
async fn process_document(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>> {
    // Cheap validation first: no fetch, render, or model call happens for a
    // request that is malformed.
    let mode = StrategyMode::parse(&request.strategy_mode)?;
    schema::validate_fields(&request.fields)?;

    let fetched = state.source.fetch(&request.source_reference).await?;

    let response = run_pipeline(
        &state,
        fetched.filename,
        fetched.bytes,
        fetched.declared_mime,
        mode,
        request.general_instructions,
        request.fields,
        request.deadline_ms,
        request.correlation_id,
    )
    .await?;

    Ok(Json(response))
}

/// Process an uploaded document (multipart: `file` + `request` JSON part).
async fn process_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>> {
    let mut filename = String::from("document");
    let mut declared_mime = None;
    let mut file_data = Vec::new();
    let mut request: Option<UploadRequest> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ExtractError::Invalid(format!("multipart error: {e}")))?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().unwrap_or("document").to_string();
                declared_mime = field.content_type().map(|c| c.to_string());
                file_data = field
                    .bytes()
                    .await
                    .map_err(|e| ExtractError::Invalid(format!("failed to read file: {e}")))?
                    .to_vec();
            }
            Some("request") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ExtractError::Invalid(format!("failed to read request: {e}")))?;
                request = Some(
                    serde_json::from_str(&raw)
                        .map_err(|e| ExtractError::Invalid(format!("bad request part: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let request = request
        .ok_or_else(|| ExtractError::Invalid("missing 'request' part".into()))?;
    if file_data.is_empty() {
        return Err(ExtractError::Invalid("no file uploaded".into()));
    }

    let mode = StrategyMode::parse(&request.strategy_mode)?;
    schema::validate_fields(&request.fields)?;

    let response = run_pipeline(
        &state,
        filename,
        file_data,
        declared_mime,
        mode,
        request.general_instructions,
        request.fields,
        request.deadline_ms,
        request.correlation_id,
    )
    .await?;

    Ok(Json(response))
}

/// Get a finished extraction by job id.
async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> std::result::Result<Json<ProcessResponse>, axum::http::StatusCode> {
    let results = state.results.read().unwrap();
    results
        .get(&job_id)
        .cloned()
        .map(Json)
        .ok_or(axum::http::StatusCode::NOT_FOUND)
}

// ============================================================================
// Pipeline
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    state: &AppState,
    filename: String,
    bytes: Vec<u8>,
    declared_mime: Option<String>,
    mode: StrategyMode,
    general_instructions: String,
    fields: Vec<FieldSpec>,
    deadline_ms: Option<u64>,
    correlation_id: Option<String>,
) -> Result<ProcessResponse> {
    info!(
        "Received document: {} ({} bytes), mode {}",
        filename,
        bytes.len(),
        mode.as_str()
    );

    let document_id = {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    };

    let deadline = deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms));

    // Render pages for the vision path (every mode uses it).
    let pages = state.renderer.render(bytes.clone(), declared_mime.as_deref()).await?;
    let vision = VisionBackend::new(state.openrouter.clone(), pages);

    // The text path additionally needs the document analyzed; only pay for
    // that in dual-backend modes. Analysis is retried once; persistent
    // failure degrades the text side instead of failing the request.
    let text = match mode {
        StrategyMode::VisionOnly => None,
        StrategyMode::TextPlusVision | StrategyMode::HybridConsensus => {
            match analyze_with_retry(state.ocr.as_ref(), &filename, &bytes).await {
                Ok(doc) => Some(TextBackend::new(state.openrouter.clone(), doc.pages)),
                Err(e) => {
                    warn!("Document analysis failed after retry: {}", e);
                    None
                }
            }
        }
    };

    let request = ExtractionRequest {
        fields,
        general_instructions,
        strategy_mode: mode,
        deadline,
    };

    let output = state
        .orchestrator
        .run(
            &request,
            &vision,
            text.as_ref().map(|t| t as &dyn backend::ExtractionBackend),
        )
        .await?;

    // Persistence is at-least-once from the sink's side; the core hands the
    // result over exactly once and never fails the request on sink errors.
    if let Err(e) = state
        .sink
        .persist(&document_id, &output.results, &output.summary)
        .await
    {
        error!("Failed to persist extraction for {}: {}", document_id, e);
    }

    let response = ProcessResponse {
        job_id: format!("job_{}", uuid::Uuid::new_v4().simple()),
        document_id,
        message: match output.summary.status {
            schema::ProcessingStatus::Completed => "Document processed successfully".to_string(),
            schema::ProcessingStatus::Partial => format!(
                "Document processed with degraded results: {}",
                output.summary.errors.join("; ")
            ),
            schema::ProcessingStatus::Failed => "Document processing failed".to_string(),
        },
        extraction_data: output.results,
        processing_summary: output.summary,
        correlation_id,
    };

    {
        let mut results = state.results.write().unwrap();
        results.insert(response.job_id.clone(), response.clone());
    }

    info!("Extraction stored: {}", response.job_id);
    Ok(response)
}

async fn analyze_with_retry(
    ocr: &dyn OcrProvider,
    filename: &str,
    bytes: &[u8],
) -> Result<ocr::OcrDocument> {
    match ocr.analyze(filename, bytes).await {
        Ok(doc) => Ok(doc),
        Err(e) => {
            warn!("{} analysis failed: {}; retrying", ocr.name(), e);
            ocr.analyze(filename, bytes).await
        }
    }
}
