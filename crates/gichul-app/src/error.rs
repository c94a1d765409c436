//! Application-level error type shared by the binary.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::AppConfigError;
use crate::server::ServerError;
use crate::services::llm::LlmError;
use crate::services::orchestrator::ParseError;

/// CLI exit codes per the public contract.
pub const EXIT_INPUT_ERROR: i32 = 2;
pub const EXIT_LLM_ERROR: i32 = 3;
pub const EXIT_VALIDATION_ERROR: i32 = 4;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] AppConfigError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to read input file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Parse(ParseError::Input(_)) | AppError::Parse(ParseError::Config(_)) => {
                EXIT_INPUT_ERROR
            }
            AppError::Parse(ParseError::Llm(error)) => match error {
                LlmError::Quota(_)
                | LlmError::Transport(_)
                | LlmError::RateLimited { .. }
                | LlmError::Unavailable(_)
                | LlmError::Format(_) => EXIT_LLM_ERROR,
                _ => 1,
            },
            AppError::Io { .. } => EXIT_INPUT_ERROR,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::InputError;
    use crate::services::orchestrator::ConfigError;

    #[test]
    fn exit_codes_follow_the_contract() {
        let input = AppError::Parse(ParseError::Input(InputError::DpiRange { dpi: 9 }));
        assert_eq!(input.exit_code(), EXIT_INPUT_ERROR);

        let config = AppError::Parse(ParseError::Config(ConfigError::Malformed("x".into())));
        assert_eq!(config.exit_code(), EXIT_INPUT_ERROR);

        let quota = AppError::Parse(ParseError::Llm(LlmError::Quota("limit".into())));
        assert_eq!(quota.exit_code(), EXIT_LLM_ERROR);

        let transport = AppError::Parse(ParseError::Llm(LlmError::Transport("down".into())));
        assert_eq!(transport.exit_code(), EXIT_LLM_ERROR);
    }
}
