//! Fallback engine: pure-Rust glyph-layout text extraction.
//!
//! No external toolchain and no OCR — works only for PDFs with embedded
//! text, which covers most academy-produced booklets. Pages that fail to
//! extract degrade to warnings as long as at least one page succeeds.

use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{DocParseError, DocumentParser, Extraction, ParserMetrics};
use crate::pdf;

const ENGINE: &str = "pdftext";

pub struct PdfTextEngine {
    pdf_path: Option<PathBuf>,
    metrics: ParserMetrics,
}

impl PdfTextEngine {
    pub fn new() -> Self {
        Self {
            pdf_path: None,
            metrics: ParserMetrics {
                engine: ENGINE,
                ..Default::default()
            },
        }
    }
}

impl Default for PdfTextEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for PdfTextEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn set_pdf_path(&mut self, path: &Path) {
        self.pdf_path = Some(path.to_path_buf());
    }

    fn extract_from_pdf(&mut self) -> Result<Extraction, DocParseError> {
        let pdf_path = self
            .pdf_path
            .clone()
            .ok_or(DocParseError::MissingInput { engine: ENGINE })?;

        let started = Instant::now();
        let pages = pdf::extract_page_texts(&pdf_path).map_err(|source| DocParseError::Runtime {
            engine: ENGINE,
            reason: source.to_string(),
        })?;

        let mut sections = Vec::with_capacity(pages.len());
        let mut warnings = Vec::new();

        for page in pages {
            match page {
                Ok(page_text) => {
                    let mut section =
                        format!("--- Page {} ---\n{}", page_text.page_index + 1, page_text.text);
                    for _ in 0..page_text.image_count {
                        section.push_str(&format!(
                            "\n[IMAGE: page={}, caption=unlabeled figure]",
                            page_text.page_index + 1
                        ));
                    }
                    sections.push(section);
                }
                Err(reason) => warnings.push(format!("partial extraction: {reason}")),
            }
        }
        self.metrics.extract_seconds = started.elapsed().as_secs_f64();

        if sections.is_empty() {
            return Err(DocParseError::Runtime {
                engine: ENGINE,
                reason: format!("all pages failed: {}", warnings.join("; ")),
            });
        }

        Ok(Extraction {
            markdown: sections.join("\n\n"),
            warnings,
        })
    }

    fn metrics(&self) -> ParserMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_without_path_fails_cleanly() {
        let mut engine = PdfTextEngine::new();
        assert!(matches!(
            engine.extract_from_pdf(),
            Err(DocParseError::MissingInput { engine: "pdftext" })
        ));
    }
}
