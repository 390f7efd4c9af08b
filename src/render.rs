//! Page renderer: turns raw document bytes into an ordered sequence of
//! normalized page images for vision-model consumption.
//!
//! Supported inputs: PDF (rasterized via pdfium), raster images (PNG, JPEG,
//! TIFF, WEBP), and office formats (DOCX/XLSX/PPTX, converted to PDF with
//! headless LibreOffice first). Page order always matches the source's
//! natural reading order; dimensions are capped so downstream payloads stay
//! bounded. Stateless between calls.

use crate::config::RenderConfig;
use crate::error::{ExtractError, Result};
use anyhow::Context;
use image::imageops::FilterType;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One rendered page, 1-indexed, PNG-encoded.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page_num: u32,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Closed set of supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Raster,
    /// Zip-based office package (docx, xlsx, pptx).
    Office,
    /// Legacy OLE office container (doc, xls, ppt).
    LegacyOffice,
}

/// Sniff the document format from magic bytes, falling back to the declared
/// MIME type. Unknown formats are rejected before any rendering work.
pub fn sniff_format(bytes: &[u8], declared_mime: Option<&str>) -> Result<DocumentFormat> {
    if bytes.starts_with(b"%PDF") {
        return Ok(DocumentFormat::Pdf);
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G'])
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"II*\0")
        || bytes.starts_with(b"MM\0*")
        || (bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP"))
    {
        return Ok(DocumentFormat::Raster);
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return Ok(DocumentFormat::Office);
    }
    if bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
        return Ok(DocumentFormat::LegacyOffice);
    }

    // Magic bytes inconclusive: trust the declared type if it names a
    // supported format.
    match declared_mime {
        Some("application/pdf") => Ok(DocumentFormat::Pdf),
        Some(m) if m.starts_with("image/") => Ok(DocumentFormat::Raster),
        Some(m) if m.contains("officedocument") || m.contains("opendocument") => {
            Ok(DocumentFormat::Office)
        }
        Some(m) if m.contains("msword") || m.contains("ms-excel") || m.contains("ms-powerpoint") => {
            Ok(DocumentFormat::LegacyOffice)
        }
        other => Err(ExtractError::UnsupportedFormat(
            other.unwrap_or("unknown").to_string(),
        )),
    }
}

/// Stateless document-to-page-images transform.
#[derive(Debug, Clone, Copy)]
pub struct PageRenderer {
    config: RenderConfig,
}

impl PageRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Render a document to ordered page images.
    pub async fn render(&self, bytes: Vec<u8>, declared_mime: Option<&str>) -> Result<Vec<PageImage>> {
        let format = sniff_format(&bytes, declared_mime)?;
        debug!("Rendering document: {} bytes, format {:?}", bytes.len(), format);

        let pages = match format {
            DocumentFormat::Pdf => self.render_pdf(bytes).await?,
            DocumentFormat::Raster => vec![self.normalize_raster(&bytes)?],
            DocumentFormat::Office | DocumentFormat::LegacyOffice => {
                let pdf = office_to_pdf(&bytes, format).await?;
                self.render_pdf(pdf).await?
            }
        };

        info!("Rendered {} page(s)", pages.len());
        Ok(pages)
    }

    async fn render_pdf(&self, bytes: Vec<u8>) -> Result<Vec<PageImage>> {
        // Cheap integrity probe before handing bytes to pdfium.
        lopdf::Document::load_mem(&bytes)
            .map_err(|e| ExtractError::DocumentCorrupt(format!("PDF parse failed: {e}")))?;

        let config = self.config;
        tokio::task::spawn_blocking(move || rasterize_pdf(&bytes, config))
            .await
            .context("PDF render task panicked")?
    }

    /// A raster image is a single-page document; decode, cap dimensions,
    /// re-encode as PNG.
    fn normalize_raster(&self, bytes: &[u8]) -> Result<PageImage> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| ExtractError::DocumentCorrupt(format!("image decode failed: {e}")))?;

        let img = cap_dimensions(img, self.config.max_edge);
        encode_page(img, 1)
    }
}

/// Rasterize all pages of a PDF with pdfium. Blocking; run on the blocking
/// pool.
fn rasterize_pdf(bytes: &[u8], config: RenderConfig) -> Result<Vec<PageImage>> {
    let pdfium = Pdfium::new(
        Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| anyhow::anyhow!("failed to bind pdfium library: {e}"))?,
    );

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ExtractError::DocumentCorrupt(format!("pdfium load failed: {e}")))?;

    let scale = config.dpi / 72.0; // PDF points are 72 per inch
    let mut pages = Vec::new();

    for (idx, page) in document.pages().iter().enumerate() {
        let pixel_width = (page.width().value * scale) as i32;
        let pixel_height = (page.height().value * scale) as i32;

        let bitmap = page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(pixel_width)
                    .set_target_height(pixel_height),
            )
            .map_err(|e| {
                ExtractError::DocumentCorrupt(format!("page {} render failed: {e}", idx + 1))
            })?;

        let img = cap_dimensions(bitmap.as_image(), config.max_edge);
        pages.push(encode_page(img, idx as u32 + 1)?);
    }

    if pages.is_empty() {
        return Err(ExtractError::DocumentCorrupt("PDF has no pages".into()));
    }

    Ok(pages)
}

/// Convert an office document to PDF using headless LibreOffice.
async fn office_to_pdf(bytes: &[u8], format: DocumentFormat) -> Result<Vec<u8>> {
    let dir = tempfile::tempdir().context("failed to create temp dir")?;
    // LibreOffice sniffs content itself; the extension only has to be
    // plausible for the container type.
    let ext = if format == DocumentFormat::LegacyOffice { "doc" } else { "docx" };
    let input_path = dir.path().join(format!("input.{ext}"));
    tokio::fs::write(&input_path, bytes)
        .await
        .context("failed to write temp office file")?;

    let output = Command::new("soffice")
        .arg("--headless")
        .arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(dir.path())
        .arg(&input_path)
        .output()
        .await
        .context("failed to launch soffice (is LibreOffice installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("soffice conversion failed: {}", stderr);
        return Err(ExtractError::DocumentCorrupt(format!(
            "office conversion failed: {}",
            stderr.trim()
        )));
    }

    let pdf_path = dir.path().join("input.pdf");
    tokio::fs::read(&pdf_path)
        .await
        .map_err(|e| ExtractError::DocumentCorrupt(format!("converted PDF missing: {e}")))
}

fn cap_dimensions(img: image::DynamicImage, max_edge: u32) -> image::DynamicImage {
    if img.width() > max_edge || img.height() > max_edge {
        img.resize(max_edge, max_edge, FilterType::Lanczos3)
    } else {
        img
    }
}

fn encode_page(img: image::DynamicImage, page_num: u32) -> Result<PageImage> {
    let (width, height) = (img.width(), img.height());
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("PNG encode failed")?;

    Ok(PageImage {
        page_num,
        png,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_pdf() {
        assert_eq!(
            sniff_format(b"%PDF-1.7\n...", None).unwrap(),
            DocumentFormat::Pdf
        );
    }

    #[test]
    fn test_sniff_raster_magic() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_format(&png, None).unwrap(), DocumentFormat::Raster);
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0];
        assert_eq!(sniff_format(&jpeg, None).unwrap(), DocumentFormat::Raster);
    }

    #[test]
    fn test_sniff_office_zip() {
        assert_eq!(
            sniff_format(b"PK\x03\x04rest-of-zip", None).unwrap(),
            DocumentFormat::Office
        );
    }

    #[test]
    fn test_sniff_falls_back_to_declared_mime() {
        assert_eq!(
            sniff_format(b"garbage", Some("application/pdf")).unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            sniff_format(b"garbage", Some("image/png")).unwrap(),
            DocumentFormat::Raster
        );
    }

    #[test]
    fn test_sniff_unknown_is_unsupported() {
        assert!(matches!(
            sniff_format(b"garbage", Some("text/html")),
            Err(ExtractError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            sniff_format(b"garbage", None),
            Err(ExtractError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_normalize_raster_caps_dimensions() {
        // 4000x100 white strip, encoded as PNG.
        let img = image::DynamicImage::new_rgb8(4000, 100);
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let renderer = PageRenderer::new(RenderConfig {
            dpi: 150.0,
            max_edge: 2048,
        });
        let page = renderer.normalize_raster(&png).unwrap();
        assert_eq!(page.page_num, 1);
        assert!(page.width <= 2048 && page.height <= 2048);
    }

    #[test]
    fn test_corrupt_raster_is_document_corrupt() {
        let renderer = PageRenderer::new(RenderConfig::default());
        assert!(matches!(
            renderer.normalize_raster(&[0x89, b'P', b'N', b'G', 0, 1, 2]),
            Err(ExtractError::DocumentCorrupt(_))
        ));
    }
}
