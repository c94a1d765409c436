//! Explanation generation for parsed questions.
//!
//! Explanations are advisory: any failure leaves the exam untouched and is
//! surfaced only through logs and the failure counter, never through the
//! validation result.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;

use crate::exam::{ParsedExam, Question};
use crate::prompt::build_explanation_prompt;
use crate::services::llm::{ChatRequest, LlmCaller, LlmTransport, strip_code_fences};
use crate::services::usage::TokenUsage;

const EXPLANATION_TEMPERATURE: f32 = 0.3;
const EXPLANATION_MAX_OUTPUT_TOKENS: u32 = 8_192;

/// The reply is specified as an array of entries, but models occasionally
/// emit a number→explanation map; both are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExplanationReply {
    Entries(Vec<ExplanationEntry>),
    Map(HashMap<String, String>),
}

#[derive(Debug, Deserialize)]
struct ExplanationEntry {
    number: u32,
    #[serde(default)]
    explanation: String,
}

pub struct Explainer {
    caller: LlmCaller,
    attempt_timeout: Duration,
    failures: AtomicU64,
}

impl Explainer {
    pub fn new(transport: Arc<dyn LlmTransport>, attempt_timeout: Duration) -> Self {
        Self {
            caller: LlmCaller::new(transport),
            attempt_timeout,
            failures: AtomicU64::new(0),
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Attach explanations to every eligible question.
    ///
    /// Repeated calls overwrite prior explanations. On any failure the exam
    /// is returned unchanged together with whatever tokens were spent.
    pub async fn add_explanations(&self, mut exam: ParsedExam) -> (ParsedExam, TokenUsage) {
        let eligible: Vec<&Question> = exam
            .questions
            .iter()
            .filter(|question| should_explain(question))
            .collect();

        if eligible.is_empty() {
            tracing::info!("no explainable questions found");
            return (exam, TokenUsage::default());
        }

        let request = ChatRequest {
            prompt: build_explanation_prompt(&eligible),
            temperature: EXPLANATION_TEMPERATURE,
            max_output_tokens: EXPLANATION_MAX_OUTPUT_TOKENS,
            response_schema: None,
            timeout: self.attempt_timeout,
        };

        let reply = self
            .caller
            .call(&request, |text| {
                serde_json::from_str::<ExplanationReply>(strip_code_fences(text))
                    .map_err(|error| format!("explanation reply is not JSON: {error}"))
            })
            .await;

        match reply {
            Ok(reply) => {
                let explanations = into_map(reply.value);
                let mut attached = 0usize;
                for question in &mut exam.questions {
                    if let Some(explanation) = explanations.get(&question.number) {
                        if !explanation.trim().is_empty() {
                            question.explanation = Some(explanation.trim().to_string());
                            attached += 1;
                        }
                    }
                }
                tracing::info!(
                    model = self.caller.model_name(),
                    attached,
                    eligible = explanations.len(),
                    input_tokens = reply.usage.input_tokens,
                    output_tokens = reply.usage.output_tokens,
                    "explanations attached"
                );
                (exam, reply.usage)
            }
            Err(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    model = self.caller.model_name(),
                    error = %error,
                    "explanation generation failed; returning exam unchanged"
                );
                (exam, TokenUsage::default())
            }
        }
    }
}

/// Listening questions and questions with neither passage nor choices are
/// skipped.
pub fn should_explain(question: &Question) -> bool {
    question.is_explainable()
}

fn into_map(reply: ExplanationReply) -> HashMap<u32, String> {
    match reply {
        ExplanationReply::Entries(entries) => entries
            .into_iter()
            .map(|entry| (entry.number, entry.explanation))
            .collect(),
        ExplanationReply::Map(map) => map
            .into_iter()
            .filter_map(|(number, explanation)| {
                number.trim().parse::<u32>().ok().map(|n| (n, explanation))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::QuestionType;

    fn question(number: u32, question_type: QuestionType) -> Question {
        Question {
            number,
            question_type,
            question_text: format!("문제 {number}"),
            passage: String::new(),
            choices: Vec::new(),
            points: 2,
            vocabulary_notes: Vec::new(),
            has_image: false,
            has_table: false,
            image_description: None,
            sub_questions: Vec::new(),
            group_range: None,
            explanation: None,
        }
    }

    #[test]
    fn listening_and_empty_questions_are_skipped() {
        let listening = question(3, QuestionType::Listening);
        assert!(!should_explain(&listening));

        let empty = question(20, QuestionType::Purpose);
        assert!(!should_explain(&empty));

        let mut with_passage = question(21, QuestionType::Purpose);
        with_passage.passage = "Some passage".into();
        assert!(should_explain(&with_passage));

        let mut with_choices = question(22, QuestionType::Vocabulary);
        with_choices.choices.push(crate::exam::Choice {
            number: 1,
            text: "choice".into(),
        });
        assert!(should_explain(&with_choices));
    }

    #[test]
    fn reply_map_form_is_accepted() {
        let reply: ExplanationReply =
            serde_json::from_str(r#"{"18": "첫 해설", "19": "둘째 해설"}"#).expect("map parses");
        let map = into_map(reply);
        assert_eq!(map.get(&18).map(String::as_str), Some("첫 해설"));

        let reply: ExplanationReply =
            serde_json::from_str(r#"[{"number": 18, "explanation": "해설"}]"#)
                .expect("array parses");
        let map = into_map(reply);
        assert_eq!(map.get(&18).map(String::as_str), Some("해설"));
    }
}
