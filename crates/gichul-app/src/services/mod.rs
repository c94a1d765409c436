//! IO-bound pipeline services.
//!
//! Modules here coordinate external systems (document-parser toolchains,
//! LLM providers, the job queue). Pure transforms stay in `crate::exam` and
//! `crate::pdf` so concurrency and accounting stay localized.

pub mod docparse;
pub mod explainer;
pub mod jobs;
pub mod llm;
pub mod orchestrator;
pub mod structured;
pub mod usage;

pub use docparse::{DocParseError, DocumentParser, EngineInfo, Extraction, ParserMetrics};
pub use explainer::Explainer;
pub use jobs::{JobConfig, JobManager, JobPayload, JobRunner, JobState, ParseJob};
pub use llm::{ChatRequest, ChatResponse, LlmBackend, LlmCaller, LlmError, LlmTransport};
pub use orchestrator::{
    ConfigError, DEFAULT_MODEL_SPEC, ModelInfo, ModelSpec, Orchestrator, ParseError, ParseOptions,
    ParseOutcome, model_specs,
};
pub use structured::{StructuredError, StructuredExtractor, StructuredOutcome};
pub use usage::{CostReport, LayerTimings, TokenUsage};
