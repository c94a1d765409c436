//! MinerU engine: deep-learning layout analysis via the external `mineru`
//! toolchain.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Instant;

use bon::Builder;

use super::{DocParseError, DocumentParser, Extraction, ParserMetrics, normalize_image_refs, probe_binary};

const ENGINE: &str = "mineru";
const BINARY: &str = "mineru";

/// Markdown rendering mode: `MmMarkdown` keeps tables and image
/// placeholders, `NlpMarkdown` strips them for text-only downstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MakeMode {
    #[default]
    MmMarkdown,
    NlpMarkdown,
}

impl MakeMode {
    pub fn parse(raw: &str) -> MakeMode {
        match raw {
            "nlp_markdown" => MakeMode::NlpMarkdown,
            _ => MakeMode::MmMarkdown,
        }
    }
}

/// MinerU tuning options, loaded from `MINERU_*` environment variables.
#[derive(Debug, Clone, Builder)]
pub struct MineruConfig {
    #[builder(into, default = "korean".to_string())]
    pub language: String,
    #[builder(into, default = "auto".to_string())]
    pub parse_method: String,
    #[builder(default = true)]
    pub formula_enable: bool,
    #[builder(default = true)]
    pub table_enable: bool,
    #[builder(default)]
    pub make_mode: MakeMode,
}

impl Default for MineruConfig {
    fn default() -> Self {
        MineruConfig::builder().build()
    }
}

// The toolchain loads its layout and OCR models once; the probe result is
// process-wide state shared by every engine instance.
static AVAILABILITY: OnceLock<(Result<(), String>, f64)> = OnceLock::new();

fn ensure_available() -> Result<f64, DocParseError> {
    let (result, init_seconds) = AVAILABILITY.get_or_init(|| {
        let started = Instant::now();
        let result = probe_binary(BINARY);
        (result, started.elapsed().as_secs_f64())
    });

    match result {
        Ok(()) => Ok(*init_seconds),
        Err(reason) => Err(DocParseError::Init {
            engine: ENGINE,
            reason: reason.clone(),
        }),
    }
}

pub fn is_available() -> bool {
    ensure_available().is_ok()
}

pub struct MineruEngine {
    config: MineruConfig,
    pdf_path: Option<PathBuf>,
    metrics: ParserMetrics,
}

impl MineruEngine {
    pub fn new(config: MineruConfig) -> Self {
        Self {
            config,
            pdf_path: None,
            metrics: ParserMetrics {
                engine: ENGINE,
                ..Default::default()
            },
        }
    }

    fn run_toolchain(&self, pdf_path: &Path) -> Result<String, DocParseError> {
        let workdir = tempfile::tempdir().map_err(|source| DocParseError::Runtime {
            engine: ENGINE,
            reason: format!("failed to create work directory: {source}"),
        })?;

        let output = Command::new(BINARY)
            .arg("-p")
            .arg(pdf_path)
            .arg("-o")
            .arg(workdir.path())
            .arg("-l")
            .arg(&self.config.language)
            .arg("-m")
            .arg(&self.config.parse_method)
            .arg("-f")
            .arg(if self.config.formula_enable {
                "true"
            } else {
                "false"
            })
            .arg("-t")
            .arg(if self.config.table_enable {
                "true"
            } else {
                "false"
            })
            .output()
            .map_err(|source| DocParseError::Runtime {
                engine: ENGINE,
                reason: format!("failed to spawn `{BINARY}`: {source}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocParseError::Runtime {
                engine: ENGINE,
                reason: format!(
                    "`{BINARY}` exited with {}: {}",
                    output.status,
                    stderr.chars().take(500).collect::<String>()
                ),
            });
        }

        let markdown_path =
            find_markdown(workdir.path()).ok_or_else(|| DocParseError::Runtime {
                engine: ENGINE,
                reason: "toolchain produced no markdown output".to_string(),
            })?;

        fs::read_to_string(&markdown_path).map_err(|source| DocParseError::Runtime {
            engine: ENGINE,
            reason: format!("failed to read {}: {source}", markdown_path.display()),
        })
    }
}

impl DocumentParser for MineruEngine {
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

        self.metrics.init_seconds = ensure_available()?;

        tracing::info!(
            language = %self.config.language,
            parse_method = %self.config.parse_method,
            formula = self.config.formula_enable,
            table = self.config.table_enable,
            "running MinerU extraction"
        );

        let started = Instant::now();
        let raw = self.run_toolchain(&pdf_path)?;
        self.metrics.extract_seconds = started.elapsed().as_secs_f64();

        let markdown = match self.config.make_mode {
            MakeMode::MmMarkdown => normalize_image_refs(&raw),
            MakeMode::NlpMarkdown => strip_visual_content(&raw),
        };

        tracing::info!(chars = markdown.len(), "MinerU extraction complete");
        Ok(Extraction {
            markdown,
            warnings: Vec::new(),
        })
    }

    fn metrics(&self) -> ParserMetrics {
        self.metrics.clone()
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

/// Drop tables and image references for text-only markdown mode.
fn strip_visual_content(markdown: &str) -> String {
    let mut out = Vec::new();
    let mut in_html_table = false;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("<table") {
            in_html_table = true;
        }
        let keep = !in_html_table
            && !trimmed.starts_with("![")
            && !(trimmed.starts_with('|') && trimmed.ends_with('|'));
        if keep {
            out.push(line);
        }
        if in_html_table && trimmed.contains("</table>") {
            in_html_table = false;
        }
    }

    out.join("\n")
}
