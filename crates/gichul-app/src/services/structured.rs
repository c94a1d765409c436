//! Layer 2: project extracted Markdown onto the exam schema via one LLM call.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::exam::{ParsedExam, SchemaError, project};
use crate::prompt::build_structuring_prompt;
use crate::services::llm::{ChatRequest, LlmCaller, LlmError, LlmTransport, strip_code_fences};
use crate::services::usage::TokenUsage;

const STRUCTURING_TEMPERATURE: f32 = 0.1;
const STRUCTURING_MAX_OUTPUT_TOKENS: u32 = 65_536;

#[derive(Debug, Error)]
pub enum StructuredError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Clone)]
pub struct StructuredOutcome {
    pub exam: ParsedExam,
    pub usage: TokenUsage,
    pub retries: u32,
}

/// Drives the structuring call: prompt assembly, fence stripping, JSON
/// parsing (retried through the caller), then schema projection.
#[derive(Clone)]
pub struct StructuredExtractor {
    caller: LlmCaller,
    schema: JsonValue,
    attempt_timeout: Duration,
}

impl StructuredExtractor {
    pub fn new(transport: Arc<dyn LlmTransport>, attempt_timeout: Duration) -> Self {
        Self {
            caller: LlmCaller::new(transport),
            schema: ParsedExam::schema(),
            attempt_timeout,
        }
    }

    pub async fn extract(&self, markdown: &str) -> Result<StructuredOutcome, StructuredError> {
        let request = ChatRequest {
            prompt: build_structuring_prompt(markdown),
            temperature: STRUCTURING_TEMPERATURE,
            max_output_tokens: STRUCTURING_MAX_OUTPUT_TOKENS,
            response_schema: Some(self.schema.clone()),
            timeout: self.attempt_timeout,
        };

        let reply = self
            .caller
            .call(&request, |text| {
                serde_json::from_str::<JsonValue>(strip_code_fences(text))
                    .map_err(|error| format!("structuring reply is not JSON: {error}"))
            })
            .await?;

        let exam = project(reply.value)?;
        tracing::info!(
            model = self.caller.model_name(),
            questions = exam.questions.len(),
            input_tokens = reply.usage.input_tokens,
            output_tokens = reply.usage.output_tokens,
            retries = reply.retries,
            "structuring complete"
        );

        Ok(StructuredOutcome {
            exam,
            usage: reply.usage,
            retries: reply.retries,
        })
    }
}
