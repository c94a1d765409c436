//! Document parser engines: PDF in, structured Markdown out.
//!
//! Engines are selected by name at configuration time and expose the narrow
//! `{set_pdf_path, extract_from_pdf}` surface. Heavy engine initialization
//! (external toolchains, layout models) happens once per process on first
//! use; extraction is blocking and must run off the request path.

pub mod external;
pub mod mineru;
pub mod pdftext;

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::config::Settings;

pub use external::{DoclingEngine, MarkerEngine};
pub use mineru::{MakeMode, MineruConfig, MineruEngine};
pub use pdftext::PdfTextEngine;

pub const ENGINE_NAMES: [&str; 4] = ["mineru", "marker", "docling", "pdftext"];
pub const PREFERRED_ENGINE: &str = "mineru";

#[derive(Debug, Error)]
pub enum DocParseError {
    #[error("document parser `{engine}` is not available: {reason}")]
    Init { engine: &'static str, reason: String },

    #[error("document parser `{engine}` failed: {reason}")]
    Runtime { engine: &'static str, reason: String },

    #[error("no PDF path set for document parser `{engine}`")]
    MissingInput { engine: &'static str },
}

impl DocParseError {
    pub fn is_init(&self) -> bool {
        matches!(self, DocParseError::Init { .. })
    }
}

/// Markdown extracted from one document, with warnings for pages that were
/// skipped rather than fatal.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub markdown: String,
    pub warnings: Vec<String>,
}

/// Timing metrics for the engine run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParserMetrics {
    pub engine: &'static str,
    pub init_seconds: f64,
    pub extract_seconds: f64,
}

pub trait DocumentParser: Send {
    fn name(&self) -> &'static str;

    fn set_pdf_path(&mut self, path: &Path);

    /// Convert the configured PDF into Markdown. Blocking.
    fn extract_from_pdf(&mut self) -> Result<Extraction, DocParseError>;

    fn metrics(&self) -> ParserMetrics;
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub name: &'static str,
    pub available: bool,
}

/// Instantiate the named engine, configured from settings.
pub fn engine_for(name: &str, settings: &Settings) -> Option<Box<dyn DocumentParser>> {
    match name {
        "mineru" => Some(Box::new(MineruEngine::new(settings.mineru_config()))),
        "marker" => Some(Box::new(MarkerEngine::new())),
        "docling" => Some(Box::new(DoclingEngine::new())),
        "pdftext" => Some(Box::new(PdfTextEngine::new())),
        _ => None,
    }
}

/// Probe every engine for availability; used by `--list-ocr`.
pub fn list_engines() -> Vec<EngineInfo> {
    vec![
        EngineInfo {
            name: "mineru",
            available: mineru::is_available(),
        },
        EngineInfo {
            name: "marker",
            available: external::marker_available(),
        },
        EngineInfo {
            name: "docling",
            available: external::docling_available(),
        },
        EngineInfo {
            name: "pdftext",
            available: true,
        },
    ]
}

/// Rewrite raw Markdown image references into the placeholder form the
/// structuring layer understands.
pub(crate) fn normalize_image_refs(markdown: &str) -> String {
    use regex::Regex;
    use std::sync::OnceLock;

    static IMAGE_RE: OnceLock<Regex> = OnceLock::new();
    let image_re = IMAGE_RE
        .get_or_init(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("image regex compiles"));

    image_re
        .replace_all(markdown, |captures: &regex::Captures<'_>| {
            let caption = captures[1].trim().to_string();
            if caption.is_empty() {
                "[IMAGE: caption=unlabeled figure]".to_string()
            } else {
                format!("[IMAGE: caption={caption}]")
            }
        })
        .into_owned()
}

pub(crate) fn probe_binary(binary: &str) -> Result<(), String> {
    match std::process::Command::new(binary)
        .arg("--version")
        .output()
    {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(format!(
            "`{binary} --version` exited with {}",
            output.status
        )),
        Err(source) => Err(format!("`{binary}` not runnable: {source}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdftext_is_always_listed_available() {
        let engines = list_engines();
        let pdftext = engines
            .iter()
            .find(|engine| engine.name == "pdftext")
            .expect("pdftext listed");
        assert!(pdftext.available);
        assert_eq!(engines.len(), ENGINE_NAMES.len());
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let settings = Settings::default();
        assert!(engine_for("tesseract9000", &settings).is_none());
        assert!(engine_for("pdftext", &settings).is_some());
    }

    #[test]
    fn image_refs_become_placeholders() {
        let markdown = "intro\n![exports chart](images/1.png)\n![](images/2.png)\ntail";
        let normalized = normalize_image_refs(markdown);
        assert!(normalized.contains("[IMAGE: caption=exports chart]"));
        assert!(normalized.contains("[IMAGE: caption=unlabeled figure]"));
        assert!(!normalized.contains("images/1.png"));
    }
}
