//! OpenAI chat-completions transport.

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{ChatRequest, ChatResponse, LlmError, LlmTransport};
use crate::services::usage::TokenUsage;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiTransport {
    http: HttpClient,
    api_key: String,
    model: String,
}

impl OpenAiTransport {
    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::MissingApiKey("OPENAI_API_KEY"))?;
        Ok(Self {
            http: HttpClient::new(),
            api_key,
            model: model.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
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
    code: Option<String>,
}

#[async_trait]
impl LlmTransport for OpenAiTransport {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.temperature,
            "max_completion_tokens": request.max_output_tokens,
        });
        if request.response_schema.is_some() {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
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

        let payload: CompletionResponse = response
            .json()
            .await
            .map_err(|error| LlmError::Format(format!("invalid response envelope: {error}")))?;

        let usage = payload
            .usage
            .map(|usage| TokenUsage {
                requests: 1,
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })
            .unwrap_or(TokenUsage {
                requests: 1,
                ..Default::default()
            });

        let text = payload
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::Format("empty OpenAI response".to_string()));
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
            if body.error.code.as_deref() == Some("insufficient_quota") {
                LlmError::Quota(message)
            } else {
                LlmError::RateLimited { retry_after }
            }
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            LlmError::Unavailable(format!("{status}: {message}"))
        }
        _ => LlmError::Transport(format!("{status}: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_quota_is_terminal() {
        let quota = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            None,
            r#"{"error": {"message": "You exceeded your current quota.", "type": "insufficient_quota", "code": "insufficient_quota"}}"#,
        );
        assert!(matches!(quota, LlmError::Quota(_)));
        assert!(!quota.is_retriable());

        let rate = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            Some(2),
            r#"{"error": {"message": "Rate limit reached for requests.", "code": "rate_limit_exceeded"}}"#,
        );
        assert!(rate.is_retriable());
    }
}
