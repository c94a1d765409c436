//! LLM backends and the shared retrying call path.
//!
//! All retry policy lives here. Callers describe one request and a way to
//! parse its reply; transient provider failures (429, 503, transport drops)
//! and unparseable replies are retried with exponential backoff, quota
//! exhaustion is surfaced immediately.

pub mod gemini;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::services::usage::TokenUsage;

pub use gemini::GeminiTransport;
pub use openai::OpenAiTransport;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One request to a chat-completion style endpoint.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub response_schema: Option<JsonValue>,
    pub timeout: Duration,
}

/// One raw reply from a transport.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("unknown LLM backend `{0}`")]
    UnknownBackend(String),

    #[error("provider rate limited the request (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("provider temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("provider quota exhausted: {0}")]
    Quota(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("model returned unusable output: {0}")]
    Format(String),
}

impl LlmError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Unavailable(_)
                | LlmError::Transport(_)
                | LlmError::Format(_)
        )
    }
}

/// A single provider call. Implementations classify provider failures into
/// [`LlmError`] but never retry.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    fn model_name(&self) -> &str;

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAi,
}

/// A selectable LLM backend with its published pricing.
#[derive(Debug, Clone, Copy)]
pub struct LlmBackend {
    pub name: &'static str,
    pub provider: LlmProvider,
    pub input_price_per_1m: f64,
    pub output_price_per_1m: f64,
    pub attempt_timeout: Duration,
}

pub const LLM_BACKENDS: &[LlmBackend] = &[
    LlmBackend {
        name: "gemini-3-flash-preview",
        provider: LlmProvider::Gemini,
        input_price_per_1m: 0.30,
        output_price_per_1m: 2.50,
        attempt_timeout: Duration::from_secs(120),
    },
    LlmBackend {
        name: "gemini-3-pro-preview",
        provider: LlmProvider::Gemini,
        input_price_per_1m: 1.25,
        output_price_per_1m: 10.0,
        attempt_timeout: Duration::from_secs(300),
    },
    LlmBackend {
        name: "gpt-5.1",
        provider: LlmProvider::OpenAi,
        input_price_per_1m: 1.25,
        output_price_per_1m: 10.0,
        attempt_timeout: Duration::from_secs(300),
    },
];

pub fn backend(name: &str) -> Option<&'static LlmBackend> {
    LLM_BACKENDS.iter().find(|backend| backend.name == name)
}

impl LlmBackend {
    pub fn cost_usd(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 / 1_000_000.0) * self.input_price_per_1m
            + (usage.output_tokens as f64 / 1_000_000.0) * self.output_price_per_1m
    }

    /// Build the transport for this backend from environment credentials.
    pub fn transport_from_env(&self) -> Result<Arc<dyn LlmTransport>, LlmError> {
        match self.provider {
            LlmProvider::Gemini => Ok(Arc::new(GeminiTransport::from_env(self.name)?)),
            LlmProvider::OpenAi => Ok(Arc::new(OpenAiTransport::from_env(self.name)?)),
        }
    }
}

/// A parsed reply together with its accounting.
#[derive(Debug, Clone)]
pub struct LlmReply<T> {
    pub value: T,
    pub raw_text: String,
    pub usage: TokenUsage,
    pub retries: u32,
}

/// Shared retry loop over an [`LlmTransport`].
#[derive(Clone)]
pub struct LlmCaller {
    transport: Arc<dyn LlmTransport>,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl LlmCaller {
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            transport,
            max_attempts: MAX_ATTEMPTS,
            base_backoff: BASE_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    pub fn model_name(&self) -> &str {
        self.transport.model_name()
    }

    /// Send the request, parse the reply, and retry transient failures.
    ///
    /// The parse closure runs on every attempt; its failure counts as a
    /// format error and is retried like any transient provider fault.
    pub async fn call<T, F>(
        &self,
        request: &ChatRequest,
        parse: F,
    ) -> Result<LlmReply<T>, LlmError>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let mut usage = TokenUsage::default();
        let mut last_error = LlmError::Transport("no attempts executed".to_string());

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt, &last_error);
                tracing::warn!(
                    model = self.transport.model_name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "retrying LLM call"
                );
                tokio::time::sleep(delay).await;
            }

            match self.transport.send(request).await {
                Ok(response) => {
                    usage += response.usage;
                    match parse(&response.text) {
                        Ok(value) => {
                            return Ok(LlmReply {
                                value,
                                raw_text: response.text,
                                usage,
                                retries: attempt,
                            });
                        }
                        Err(reason) => last_error = LlmError::Format(reason),
                    }
                }
                Err(error) if error.is_retriable() => last_error = error,
                Err(error) => {
                    tracing::warn!(
                        model = self.transport.model_name(),
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        error = %error,
                        "LLM call failed without retry"
                    );
                    return Err(error);
                }
            }
        }

        tracing::warn!(
            model = self.transport.model_name(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            error = %last_error,
            "LLM call failed after {} attempts",
            self.max_attempts
        );
        Err(last_error)
    }

    fn backoff_delay(&self, attempt: u32, last_error: &LlmError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let mut delay = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exponent));

        if let LlmError::RateLimited {
            retry_after: Some(seconds),
        } = last_error
        {
            delay = delay.max(Duration::from_secs(*seconds));
        }

        delay = delay.min(self.max_backoff);

        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_secs_f64((delay.as_secs_f64() * jitter).min(self.max_backoff.as_secs_f64()))
    }
}

/// Remove Markdown code fences around a JSON reply.
pub fn strip_code_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Scripted transport returning queued outcomes in order.
    pub struct ScriptedTransport {
        pub outcomes: Mutex<Vec<Result<ChatResponse, LlmError>>>,
        pub calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        pub fn new(outcomes: Vec<Result<ChatResponse, LlmError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            *self.calls.lock().expect("call counter mutex poisoned")
        }
    }

    #[async_trait]
    impl LlmTransport for ScriptedTransport {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _request: &ChatRequest) -> Result<ChatResponse, LlmError> {
            *self.calls.lock().expect("call counter mutex poisoned") += 1;
            let mut outcomes = self.outcomes.lock().expect("outcome mutex poisoned");
            if outcomes.is_empty() {
                return Err(LlmError::Transport("script exhausted".to_string()));
            }
            outcomes.remove(0)
        }
    }

    pub fn ok_response(text: &str, input_tokens: u64, output_tokens: u64) -> ChatResponse {
        ChatResponse {
            text: text.to_string(),
            usage: TokenUsage {
                requests: 1,
                input_tokens,
                output_tokens,
            },
        }
    }

    pub fn plain_request() -> ChatRequest {
        ChatRequest {
            prompt: "prompt".to_string(),
            temperature: 0.1,
            max_output_tokens: 1024,
            response_schema: None,
            timeout: Duration::from_secs(5),
        }
    }
}
