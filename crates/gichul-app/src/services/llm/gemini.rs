//! Gemini REST transport.

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{ChatRequest, ChatResponse, LlmError, LlmTransport};
use crate::services::usage::TokenUsage;

const GENERATE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiTransport {
    http: HttpClient,
    api_key: String,
    model: String,
}

impl GeminiTransport {
    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| LlmError::MissingApiKey("GOOGLE_API_KEY"))?;
        Ok(Self {
            http: HttpClient::new(),
            api_key,
            model: model.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl LlmTransport for GeminiTransport {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut generation_config = json!({
            "temperature": request.temperature,
            "maxOutputTokens": request.max_output_tokens,
        });
        if let Some(schema) = &request.response_schema {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }

        let body = json!({
            "contents": [{"parts": [{"text": request.prompt}]}],
            "generationConfig": generation_config,
        });

        let response = self
            .http
            .post(format!("{GENERATE_URL}/{}:generateContent", self.model))
            .header("x-goog-api-key", &self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            let payload = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, retry_after, &payload));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|error| LlmError::Format(format!("invalid response envelope: {error}")))?;

        let usage = payload
            .usage_metadata
            .map(|metadata| TokenUsage {
                requests: 1,
                input_tokens: metadata.prompt_token_count,
                output_tokens: metadata.candidates_token_count,
            })
            .unwrap_or(TokenUsage {
                requests: 1,
                ..Default::default()
            });

        let text = payload
            .candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = payload
                .candidates
                .first()
                .and_then(|candidate| candidate.finish_reason.clone())
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(LlmError::Format(format!(
                "empty Gemini response (finish reason: {reason})"
            )));
        }

        Ok(ChatResponse { text, usage })
    }
}

fn classify_failure(status: StatusCode, retry_after: Option<u64>, payload: &str) -> LlmError {
    let body: ErrorEnvelope = serde_json::from_str(payload).unwrap_or(ErrorEnvelope {
        error: ErrorBody::default(),
    });
    let message = if body.error.message.is_empty() {
        payload.chars().take(200).collect()
    } else {
        body.error.message
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            // RESOURCE_EXHAUSTED covers both burst rate limits and hard
            // billing quotas; only the latter mentions the account quota.
            if message.contains("quota") || message.contains("billing") {
                LlmError::Quota(message)
            } else {
                LlmError::RateLimited { retry_after }
            }
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            LlmError::Unavailable(format!("{status}: {message}"))
        }
        _ if body.error.status == "RESOURCE_EXHAUSTED" => LlmError::Quota(message),
        _ => LlmError::Transport(format!("{status}: {message}")),
    }
}
