//! Built-in non-OCR text engines.
//!
//! Listed from cheapest to most forgiving:
//! - `utf8_text`: strict UTF-8 plain text.
//! - `pdf_text_layer`: the embedded text layer of a PDF, page by page.
//! - `lossy_text`: lossy decode of anything that is not a PDF.

use std::sync::Arc;

use lopdf::Document;
use pdf_extract::PlainTextOutput;

use super::pages::count_pages;
use super::types::{EngineError, EngineOutput, TextEngine, PAGE_BREAK};

pub const UTF8_TEXT: &str = "utf8_text";
pub const PDF_TEXT_LAYER: &str = "pdf_text_layer";
pub const LOSSY_TEXT: &str = "lossy_text";

/// Names accepted by `builtin_engine`, in default priority order.
pub const BUILTIN_ENGINES: [&str; 3] = [UTF8_TEXT, PDF_TEXT_LAYER, LOSSY_TEXT];

/// Look up a built-in engine by its configured name.
pub fn builtin_engine(name: &str) -> Option<Arc<dyn TextEngine>> {
    match name {
        UTF8_TEXT => Some(Arc::new(Utf8TextEngine)),
        PDF_TEXT_LAYER => Some(Arc::new(PdfTextLayerEngine)),
        LOSSY_TEXT => Some(Arc::new(LossyTextEngine)),
        _ => None,
    }
}

/// Bytes inspected when sniffing for PDF headers and binary content.
const SNIFF_LEN: usize = 1024;

pub(crate) fn looks_like_pdf(bytes: &[u8]) -> bool {
    find(&bytes[..bytes.len().min(SNIFF_LEN)], b"%PDF-").is_some()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Keep the first `max_pages` pages of page-break separated text.
fn limit_pages(text: &str, max_pages: Option<usize>) -> EngineOutput {
    match max_pages {
        Some(max) => {
            let pages: Vec<&str> = text.split(PAGE_BREAK).take(max.max(1)).collect();
            let count = pages.len();
            let joined = pages.join(&PAGE_BREAK.to_string());
            EngineOutput::new(joined).with_pages(count)
        }
        None => EngineOutput::new(text).with_pages(count_pages(text, None)),
    }
}

// ═══════════════════════════════════════════════════════════
// UTF-8 plain text
// ═══════════════════════════════════════════════════════════

fn decode_utf8(bytes: &[u8]) -> Result<&str, EngineError> {
    if looks_like_pdf(bytes) {
        return Err(EngineError::Unsupported("PDF input".into()));
    }
    if bytes[..bytes.len().min(SNIFF_LEN * 8)].contains(&0) {
        return Err(EngineError::Unsupported("binary input".into()));
    }

    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    std::str::from_utf8(body).map_err(|e| {
        EngineError::Unsupported(format!("invalid UTF-8 at byte {}", e.valid_up_to()))
    })
}

/// True when `bytes` are plain UTF-8 text that `utf8_text` accepts.
/// Such input has no page images, so there is nothing to OCR.
pub fn is_plain_text(bytes: &[u8]) -> bool {
    decode_utf8(bytes).is_ok()
}

/// Strict UTF-8 decoding. Form feeds mark page breaks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8TextEngine;

impl TextEngine for Utf8TextEngine {
    fn name(&self) -> &str {
        UTF8_TEXT
    }

    fn extract(&self, bytes: &[u8], max_pages: Option<usize>) -> Result<EngineOutput, EngineError> {
        let text = decode_utf8(bytes)?;
        Ok(limit_pages(text, max_pages))
    }
}

// ═══════════════════════════════════════════════════════════
// Lossy text
// ═══════════════════════════════════════════════════════════

/// Lossy decoding for mis-encoded text. Refuses PDFs and mostly-binary input.
#[derive(Debug, Default, Clone, Copy)]
pub struct LossyTextEngine;

impl TextEngine for LossyTextEngine {
    fn name(&self) -> &str {
        LOSSY_TEXT
    }

    fn extract(&self, bytes: &[u8], max_pages: Option<usize>) -> Result<EngineOutput, EngineError> {
        if looks_like_pdf(bytes) {
            return Err(EngineError::Unsupported("PDF input".into()));
        }

        let decoded = String::from_utf8_lossy(bytes);
        let total = decoded.chars().count();
        let mut dropped = 0usize;
        let text: String = decoded
            .chars()
            .filter(|&c| {
                let keep = c == '\n' || c == '\t' || c == PAGE_BREAK || !(c.is_control() || c == '\u{FFFD}');
                if !keep {
                    dropped += 1;
                }
                keep
            })
            .collect();

        if total > 0 && dropped * 2 > total {
            return Err(EngineError::Unsupported(format!(
                "mostly binary input ({dropped} of {total} characters undecodable)"
            )));
        }

        Ok(limit_pages(&text, max_pages))
    }
}

// ═══════════════════════════════════════════════════════════
// PDF text layer
// ═══════════════════════════════════════════════════════════

/// Reads the embedded text layer of a PDF page by page with `pdf-extract`,
/// which resolves font encodings and ToUnicode maps. Encrypted documents are
/// refused. Image-only pages yield empty text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextLayerEngine;

impl TextEngine for PdfTextLayerEngine {
    fn name(&self) -> &str {
        PDF_TEXT_LAYER
    }

    fn extract(&self, bytes: &[u8], max_pages: Option<usize>) -> Result<EngineOutput, EngineError> {
        if !looks_like_pdf(bytes) {
            return Err(EngineError::Corrupt("missing %PDF header".into()));
        }

        let doc = Document::load_mem(bytes)
            .map_err(|e| EngineError::Corrupt(format!("failed to parse PDF: {e}")))?;
        if doc.is_encrypted() {
            return Err(EngineError::Encrypted);
        }

        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(EngineError::Corrupt("PDF has no pages".into()));
        }
        let limit = max_pages.map_or(pages.len(), |max| max.max(1));

        let mut texts = Vec::with_capacity(limit.min(pages.len()));
        let mut unreadable = 0usize;
        for &page_num in pages.keys().take(limit) {
            match page_text(&doc, page_num) {
                Ok(text) => texts.push(text),
                Err(e) => {
                    tracing::warn!(page = page_num, error = %e, "Skipping unreadable PDF page");
                    unreadable += 1;
                    texts.push(String::new());
                }
            }
        }
        if unreadable == texts.len() {
            return Err(EngineError::Corrupt(format!(
                "no readable pages ({unreadable} failed)"
            )));
        }

        tracing::debug!(
            pages = texts.len(),
            total_pages = pages.len(),
            unreadable,
            "PDF text layer extracted"
        );
        let count = texts.len();
        Ok(EngineOutput::new(texts.join(&PAGE_BREAK.to_string())).with_pages(count))
    }
}

/// Plain text of one page (1-based).
fn page_text(doc: &Document, page_num: u32) -> Result<String, pdf_extract::OutputError> {
    let mut text = String::new();
    {
        let mut output = PlainTextOutput::new(&mut text);
        pdf_extract::output_doc_page(doc, &mut output, page_num)?;
    }
    Ok(text.trim().to_string())
}
