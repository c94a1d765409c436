//! Pipeline orchestration for a single PDF.
//!
//! Wires the document parser, the structuring call, validation, and the
//! optional explainer, and converts every internal failure into the public
//! error taxonomy before it crosses the service boundary.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::config::Settings;
use crate::exam::{ParsedExam, SchemaError, ValidationResult, validate};
use crate::pdf::{DEFAULT_DPI, InputError, PdfRasterizer};
use crate::services::docparse::{self, DocParseError, DocumentParser};
use crate::services::explainer::Explainer;
use crate::services::llm::{self, LlmBackend, LlmError};
use crate::services::structured::{StructuredError, StructuredExtractor};
use crate::services::usage::{CostReport, LayerTimings, TokenUsage};

pub const DEFAULT_MODEL_SPEC: &str = "mineru+gemini-3-pro-preview";

/// `{parser}+{llm}` selector, e.g. `mineru+gemini-3-pro-preview`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub parser: String,
    pub llm: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("model spec `{0}` must be of the form `{{parser}}+{{llm}}`")]
    Malformed(String),
    #[error("unknown document parser `{0}`")]
    UnknownParser(String),
    #[error("unknown LLM backend `{0}`")]
    UnknownLlm(String),
}

impl ModelSpec {
    pub fn backend(&self) -> &'static LlmBackend {
        llm::backend(&self.llm).expect("validated at construction")
    }
}

impl FromStr for ModelSpec {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (parser, llm_name) = raw
            .split_once('+')
            .ok_or_else(|| ConfigError::Malformed(raw.to_string()))?;
        let parser = parser.trim();
        let llm_name = llm_name.trim();

        if parser.is_empty() || llm_name.is_empty() {
            return Err(ConfigError::Malformed(raw.to_string()));
        }
        if !docparse::ENGINE_NAMES.contains(&parser) {
            return Err(ConfigError::UnknownParser(parser.to_string()));
        }
        if llm::backend(llm_name).is_none() {
            return Err(ConfigError::UnknownLlm(llm_name.to_string()));
        }

        Ok(ModelSpec {
            parser: parser.to_string(),
            llm: llm_name.to_string(),
        })
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.parser, self.llm)
    }
}

/// One `{parser}+{llm}` combination with its pricing, for model listings.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_spec: String,
    pub parser: &'static str,
    pub llm: &'static str,
    pub input_price_per_1m: f64,
    pub output_price_per_1m: f64,
}

pub fn model_specs() -> Vec<ModelInfo> {
    let mut specs = Vec::new();
    for parser in docparse::ENGINE_NAMES {
        for backend in llm::LLM_BACKENDS {
            specs.push(ModelInfo {
                model_spec: format!("{parser}+{}", backend.name),
                parser,
                llm: backend.name,
                input_price_per_1m: backend.input_price_per_1m,
                output_price_per_1m: backend.output_price_per_1m,
            });
        }
    }
    specs
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub explain: bool,
    pub dpi: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            explain: true,
            dpi: DEFAULT_DPI,
        }
    }
}

/// Everything a successful parse returns.
#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub parsed_exam: ParsedExam,
    pub validation: ValidationResult,
    pub cost: CostReport,
    pub parser_warnings: Vec<String>,
}

/// Public error taxonomy for a parse run.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Parser(#[from] DocParseError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl From<StructuredError> for ParseError {
    fn from(error: StructuredError) -> Self {
        match error {
            StructuredError::Llm(inner) => ParseError::Llm(inner),
            StructuredError::Schema(inner) => ParseError::Schema(inner),
        }
    }
}

pub struct Orchestrator {
    settings: Settings,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run the full pipeline for one PDF.
    pub async fn parse(
        &self,
        pdf_path: &Path,
        model_spec: &ModelSpec,
        options: &ParseOptions,
    ) -> Result<ParseOutcome, ParseError> {
        let backend = model_spec.backend();
        let mut engine = docparse::engine_for(&model_spec.parser, &self.settings)
            .ok_or_else(|| ConfigError::UnknownParser(model_spec.parser.clone()))?;

        let rasterizer = PdfRasterizer::new(pdf_path, options.dpi)?;
        let pages_processed = rasterizer.page_count()?;

        // Layer 1: document parsing (blocking engine work off the async path).
        let parse_started = Instant::now();
        engine.set_pdf_path(pdf_path);
        let (extraction, engine_metrics) = tokio::task::spawn_blocking(
            move || -> (Result<docparse::Extraction, DocParseError>, docparse::ParserMetrics) {
                let result = engine.extract_from_pdf();
                let metrics = engine.metrics();
                (result, metrics)
            },
        )
        .await
        .map_err(|join_error| DocParseError::Runtime {
            engine: "unknown",
            reason: format!("extraction task panicked: {join_error}"),
        })?;
        let extraction = extraction?;
        let document_parse_seconds = parse_started.elapsed().as_secs_f64();

        for warning in &extraction.warnings {
            tracing::warn!(parser = %model_spec.parser, warning, "partial extraction");
        }

        // Layer 2: LLM structuring and schema projection.
        let structure_started = Instant::now();
        let transport = backend.transport_from_env()?;
        let extractor = StructuredExtractor::new(transport.clone(), backend.attempt_timeout);
        let structured = extractor.extract(&extraction.markdown).await?;
        let structuring_seconds = structure_started.elapsed().as_secs_f64();

        // Layer 3: validation.
        let validation_started = Instant::now();
        let validation = validate(&structured.exam);
        let validation_seconds = validation_started.elapsed().as_secs_f64();

        let mut exam = structured.exam;
        let mut usage: TokenUsage = structured.usage;
        let mut explanation_seconds = 0.0;

        if options.explain {
            let explain_started = Instant::now();
            let explainer = Explainer::new(transport, backend.attempt_timeout);
            let (explained, explain_usage) = explainer.add_explanations(exam).await;
            exam = explained;
            usage += explain_usage;
            explanation_seconds = explain_started.elapsed().as_secs_f64();
        }

        let cost = CostReport {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: backend.cost_usd(&usage),
            llm_retries: structured.retries,
            pages_processed,
            timings: LayerTimings {
                document_parse_seconds,
                structuring_seconds,
                validation_seconds,
                explanation_seconds,
            },
            parser_engine: Some(engine_metrics.engine.to_string()),
            parser_init_seconds: Some(engine_metrics.init_seconds),
            parser_extract_seconds: Some(engine_metrics.extract_seconds),
        };

        tracing::info!(
            model = %model_spec,
            questions = exam.questions.len(),
            errors = validation.errors.len(),
            warnings = validation.warnings.len(),
            cost_usd = cost.cost_usd,
            "parse complete"
        );

        Ok(ParseOutcome {
            parsed_exam: exam,
            validation,
            cost,
            parser_warnings: extraction.warnings,
        })
    }
}
