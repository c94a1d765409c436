//! Thin external-toolchain engines: marker and docling.
//!
//! Both accept only a subset of the MinerU options and share the same
//! workdir-and-collect execution shape.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Instant;

use super::{DocParseError, DocumentParser, Extraction, ParserMetrics, normalize_image_refs, probe_binary};

static MARKER_AVAILABILITY: OnceLock<(Result<(), String>, f64)> = OnceLock::new();
static DOCLING_AVAILABILITY: OnceLock<(Result<(), String>, f64)> = OnceLock::new();

pub fn marker_available() -> bool {
    probe(&MARKER_AVAILABILITY, "marker_single").0.is_ok()
}

pub fn docling_available() -> bool {
    probe(&DOCLING_AVAILABILITY, "docling").0.is_ok()
}

fn probe<'a>(
    cell: &'a OnceLock<(Result<(), String>, f64)>,
    binary: &str,
) -> (&'a Result<(), String>, f64) {
    let (result, init_seconds) = cell.get_or_init(|| {
        let started = Instant::now();
        let result = probe_binary(binary);
        (result, started.elapsed().as_secs_f64())
    });
    (result, *init_seconds)
}

struct CliEngine {
    engine: &'static str,
    availability: &'static OnceLock<(Result<(), String>, f64)>,
    binary: &'static str,
    build_args: fn(&Path, &Path) -> Vec<String>,
    pdf_path: Option<PathBuf>,
    metrics: ParserMetrics,
}

impl CliEngine {
    fn extract(&mut self) -> Result<Extraction, DocParseError> {
        let pdf_path = self.pdf_path.clone().ok_or(DocParseError::MissingInput {
            engine: self.engine,
        })?;

        let (availability, init_seconds) = probe(self.availability, self.binary);
        if let Err(reason) = availability {
            return Err(DocParseError::Init {
                engine: self.engine,
                reason: reason.clone(),
            });
        }
        self.metrics.init_seconds = init_seconds;

        let workdir = tempfile::tempdir().map_err(|source| DocParseError::Runtime {
            engine: self.engine,
            reason: format!("failed to create work directory: {source}"),
        })?;

        let started = Instant::now();
        let args = (self.build_args)(&pdf_path, workdir.path());
        let output = Command::new(self.binary)
            .args(&args)
            .output()
            .map_err(|source| DocParseError::Runtime {
                engine: self.engine,
                reason: format!("failed to spawn `{}`: {source}", self.binary),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocParseError::Runtime {
                engine: self.engine,
                reason: format!(
                    "`{}` exited with {}: {}",
                    self.binary,
                    output.status,
                    stderr.chars().take(500).collect::<String>()
                ),
            });
        }

        let markdown_path =
            find_markdown(workdir.path()).ok_or_else(|| DocParseError::Runtime {
                engine: self.engine,
                reason: "toolchain produced no markdown output".to_string(),
            })?;
        let raw = fs::read_to_string(&markdown_path).map_err(|source| DocParseError::Runtime {
            engine: self.engine,
            reason: format!("failed to read {}: {source}", markdown_path.display()),
        })?;
        self.metrics.extract_seconds = started.elapsed().as_secs_f64();

        Ok(Extraction {
            markdown: normalize_image_refs(&raw),
            warnings: Vec::new(),
        })
    }
}

fn find_markdown(root: &Path) -> Option<PathBuf> {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|ext| ext.to_str()) == Some("md") {
                return Some(path);
            }
        }
    }
    None
}

pub struct MarkerEngine {
    inner: CliEngine,
}

impl MarkerEngine {
    pub fn new() -> Self {
        Self {
            inner: CliEngine {
                engine: "marker",
                availability: &MARKER_AVAILABILITY,
                binary: "marker_single",
                build_args: |pdf, out| {
                    vec![
                        pdf.display().to_string(),
                        "--output_dir".to_string(),
                        out.display().to_string(),
                        "--output_format".to_string(),
                        "markdown".to_string(),
                    ]
                },
                pdf_path: None,
                metrics: ParserMetrics {
                    engine: "marker",
                    ..Default::default()
                },
            },
        }
    }
}

impl Default for MarkerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for MarkerEngine {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn set_pdf_path(&mut self, path: &Path) {
        self.inner.pdf_path = Some(path.to_path_buf());
    }

    fn extract_from_pdf(&mut self) -> Result<Extraction, DocParseError> {
        self.inner.extract()
    }

    fn metrics(&self) -> ParserMetrics {
        self.inner.metrics.clone()
    }
}

pub struct DoclingEngine {
    inner: CliEngine,
}

impl DoclingEngine {
    pub fn new() -> Self {
        Self {
            inner: CliEngine {
                engine: "docling",
                availability: &DOCLING_AVAILABILITY,
                binary: "docling",
                build_args: |pdf, out| {
                    vec![
                        pdf.display().to_string(),
                        "--to".to_string(),
                        "md".to_string(),
                        "--output".to_string(),
                        out.display().to_string(),
                    ]
                },
                pdf_path: None,
                metrics: ParserMetrics {
                    engine: "docling",
                    ..Default::default()
                },
            },
        }
    }
}

impl Default for DoclingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for DoclingEngine {
    fn name(&self) -> &'static str {
        "docling"
    }

    fn set_pdf_path(&mut self, path: &Path) {
        self.inner.pdf_path = Some(path.to_path_buf());
    }

    fn extract_from_pdf(&mut self) -> Result<Extraction, DocParseError> {
        self.inner.extract()
    }

    fn metrics(&self) -> ParserMetrics {
        self.inner.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engines_require_a_pdf_path() {
        let mut marker = MarkerEngine::new();
        assert!(matches!(
            marker.extract_from_pdf(),
            Err(DocParseError::MissingInput { engine: "marker" })
        ));

        let mut docling = DoclingEngine::new();
        assert!(matches!(
            docling.extract_from_pdf(),
            Err(DocParseError::MissingInput { engine: "docling" })
        ));
    }
}
