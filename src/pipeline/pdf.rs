//! PDF text extraction: turn uploaded bytes into page-delimited text.
//!
//! ## Why text layer, not rasterisation?
//!
//! The downstream LLM calls consume *text*: the analysis prompt wants the
//! whole paper, the extraction prompt wants the pages around one table.
//! Research papers ship with a text layer virtually without exception, so we
//! read it directly with `lopdf` rather than rendering pages to images.
//! Scanned image-only PDFs are rejected — there is no OCR fallback, and the
//! session fails with a message that says so.
//!
//! Pages are joined with explicit `--- Page N ---` markers so downstream
//! consumers (and the LLM itself) can locate a table's page by plain string
//! search.

use crate::error::PipelineError;
use lopdf::Document;
use tracing::{debug, warn};

/// Text content of one page.
#[derive(Debug, Clone)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_number: u32,
    pub text: String,
}

/// The full extracted text of a paper, page by page.
#[derive(Debug, Clone)]
pub struct PaperText {
    pub pages: Vec<PageText>,
}

impl PaperText {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// The whole paper as one string with `--- Page N ---` boundaries.
    pub fn delimited(&self) -> String {
        render_pages(&self.pages)
    }

    /// The pages within `radius` of `center` (1-indexed, inclusive), with
    /// the same page-boundary markers.
    ///
    /// Used to build the extraction prompt: the table's own page plus its
    /// neighbours, so multi-page tables keep their continuation rows.
    pub fn window(&self, center: u32, radius: u32) -> String {
        let lo = center.saturating_sub(radius);
        let hi = center.saturating_add(radius);
        let selected: Vec<PageText> = self
            .pages
            .iter()
            .filter(|p| p.page_number >= lo && p.page_number <= hi)
            .cloned()
            .collect();
        render_pages(&selected)
    }

    /// Head of the paper (first `max_chars` characters of the delimited
    /// text), cut at a UTF-8 boundary.
    pub fn head(&self, max_chars: usize) -> String {
        let full = self.delimited();
        if full.len() <= max_chars {
            return full;
        }
        let mut end = max_chars;
        while end > 0 && !full.is_char_boundary(end) {
            end -= 1;
        }
        full[..end].to_string()
    }
}

fn render_pages(pages: &[PageText]) -> String {
    let mut out = String::new();
    for page in pages {
        out.push_str(&format!("--- Page {} ---\n", page.page_number));
        out.push_str(page.text.trim_end());
        out.push_str("\n\n");
    }
    out
}

/// Extract the text layer from PDF bytes.
///
/// # Errors
/// - [`PipelineError::NotAPdf`] when the magic bytes are wrong
/// - [`PipelineError::PdfParse`] when the document structure is unreadable
/// - [`PipelineError::NoTextLayer`] when every page yields empty text
///   (scanned image-only documents)
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<PaperText, PipelineError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(PipelineError::NotAPdf { magic });
    }

    let doc = Document::load_mem(bytes).map_err(|e| PipelineError::PdfParse {
        filename: filename.to_string(),
        detail: e.to_string(),
    })?;

    if doc.is_encrypted() {
        return Err(PipelineError::PdfParse {
            filename: filename.to_string(),
            detail: "document is encrypted".to_string(),
        });
    }

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let mut pages = Vec::with_capacity(page_numbers.len());
    for page_number in page_numbers {
        // A single unreadable page should not sink the whole paper; the
        // analysis step works fine with a gap and the extraction windows
        // simply skip it.
        let text = match doc.extract_text(&[page_number]) {
            Ok(t) => t,
            Err(e) => {
                warn!("page {page_number}: text extraction failed: {e}");
                String::new()
            }
        };
        pages.push(PageText { page_number, text });
    }

    if pages.iter().all(|p| p.text.trim().is_empty()) {
        return Err(PipelineError::NoTextLayer {
            filename: filename.to_string(),
            pages: pages.len(),
        });
    }

    debug!(
        "extracted text layer: {} pages, {} chars",
        pages.len(),
        pages.iter().map(|p| p.text.len()).sum::<usize>()
    );

    Ok(PaperText { pages })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(pages: &[(u32, &str)]) -> PaperText {
        PaperText {
            pages: pages
                .iter()
                .map(|(n, t)| PageText {
                    page_number: *n,
                    text: (*t).to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = extract_text(b"<html>nope</html>", "x.pdf").unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { .. }));
    }

    #[test]
    fn rejects_truncated_input() {
        let err = extract_text(b"%P", "x.pdf").unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { .. }));
    }

    #[test]
    fn rejects_garbage_after_magic() {
        // Depending on how far lopdf's recovery gets, this surfaces either
        // as a structural parse error or as a document with no text.
        let err = extract_text(b"%PDF-1.7 not actually a pdf", "x.pdf").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::PdfParse { .. } | PipelineError::NoTextLayer { .. }
        ));
    }

    #[test]
    fn delimited_output_marks_every_page() {
        let p = paper(&[(1, "alpha"), (2, "beta")]);
        let s = p.delimited();
        assert!(s.contains("--- Page 1 ---\nalpha"));
        assert!(s.contains("--- Page 2 ---\nbeta"));
    }

    #[test]
    fn window_selects_neighbouring_pages() {
        let p = paper(&[(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")]);
        let w = p.window(3, 1);
        assert!(!w.contains("--- Page 1 ---"));
        assert!(w.contains("--- Page 2 ---"));
        assert!(w.contains("--- Page 3 ---"));
        assert!(w.contains("--- Page 4 ---"));
        assert!(!w.contains("--- Page 5 ---"));
    }

    #[test]
    fn window_clamps_at_document_edges() {
        let p = paper(&[(1, "a"), (2, "b")]);
        let w = p.window(1, 2);
        assert!(w.contains("--- Page 1 ---"));
        assert!(w.contains("--- Page 2 ---"));
    }

    #[test]
    fn head_cuts_on_char_boundary() {
        let p = paper(&[(1, "éééééééééé")]);
        let head = p.head(20);
        assert!(head.len() <= 20);
        // Must still be valid UTF-8 (would have panicked otherwise).
        assert!(head.starts_with("--- Page 1 ---"));
    }
}
