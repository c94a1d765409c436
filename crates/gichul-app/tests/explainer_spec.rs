use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gichul_app::exam::{Choice, ExamInfo, ParsedExam, Question, QuestionType, validate};
use gichul_app::services::explainer::Explainer;
use gichul_app::services::llm::{ChatRequest, ChatResponse, LlmError, LlmTransport};
use gichul_app::services::usage::TokenUsage;

/// Fake transport that records prompts and replays scripted outcomes.
struct RecordingTransport {
    outcomes: Mutex<Vec<Result<ChatResponse, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn new(outcomes: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt mutex poisoned").clone()
    }
}

#[async_trait]
impl LlmTransport for RecordingTransport {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.prompts
            .lock()
            .expect("prompt mutex poisoned")
            .push(request.prompt.clone());
        let mut outcomes = self.outcomes.lock().expect("outcome mutex poisoned");
        if outcomes.is_empty() {
            return Err(LlmError::Transport("script exhausted".to_string()));
        }
        outcomes.remove(0)
    }
}

fn reply(text: &str) -> ChatResponse {
    ChatResponse {
        text: text.to_string(),
        usage: TokenUsage {
            requests: 1,
            input_tokens: 500,
            output_tokens: 300,
        },
    }
}

fn five_choices() -> Vec<Choice> {
    (1..=5)
        .map(|number| Choice {
            number,
            text: format!("선택지 {number}"),
        })
        .collect()
}

fn sample_exam() -> ParsedExam {
    let listening = Question {
        number: 1,
        question_type: QuestionType::Listening,
        question_text: "대화를 듣고, 여자의 마지막 말에 대한 남자의 응답을 고르시오.".into(),
        passage: String::new(),
        choices: five_choices(),
        points: 2,
        vocabulary_notes: Vec::new(),
        has_image: false,
        has_table: false,
        image_description: None,
        sub_questions: Vec::new(),
        group_range: None,
        explanation: None,
    };

    let mut reading = listening.clone();
    reading.number = 18;
    reading.question_type = QuestionType::Purpose;
    reading.question_text = "다음 글의 목적으로 가장 적절한 것은?".into();
    reading.passage =
        "Dear residents, the community pool will close for its annual maintenance next week.".into();

    ParsedExam {
        exam_info: ExamInfo {
            title: "연습 시험".into(),
            total_questions: 2,
            ..Default::default()
        },
        questions: vec![listening, reading],
    }
}

#[tokio::test(start_paused = true)]
async fn listening_questions_are_excluded_from_the_prompt() {
    let transport = RecordingTransport::new(vec![Ok(reply(
        r#"[{"number": 18, "explanation": "안내문의 핵심 문장이 폐쇄 일정을 알리고 있다."}]"#,
    ))]);
    let explainer = Explainer::new(transport.clone(), Duration::from_secs(5));

    let (exam, usage) = explainer.add_explanations(sample_exam()).await;

    let prompts = transport.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("### 문제 18"));
    assert!(!prompts[0].contains("### 문제 1\n"), "listening is skipped");

    assert!(exam.questions[0].explanation.is_none());
    assert!(exam.questions[1].explanation.is_some());
    assert_eq!(usage.input_tokens, 500);
    assert_eq!(explainer.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failure_returns_exam_unchanged_and_validation_clean() {
    let transport = RecordingTransport::new(vec![
        Err(LlmError::Transport("connection reset".to_string())),
        Err(LlmError::Transport("connection reset".to_string())),
        Err(LlmError::Transport("connection reset".to_string())),
    ]);
    let explainer = Explainer::new(transport, Duration::from_secs(5));

    let original = sample_exam();
    let (exam, usage) = explainer.add_explanations(original.clone()).await;

    assert_eq!(exam, original, "exam must come back untouched");
    assert!(exam.questions.iter().all(|q| q.explanation.is_none()));
    assert_eq!(usage, TokenUsage::default());
    assert_eq!(explainer.failure_count(), 1);

    let validation = validate(&exam);
    assert!(validation.errors.is_empty(), "{:?}", validation.errors);
}

#[tokio::test(start_paused = true)]
async fn repeated_calls_overwrite_prior_explanations() {
    let transport = RecordingTransport::new(vec![
        Ok(reply(r#"[{"number": 18, "explanation": "첫 번째 해설"}]"#)),
        Ok(reply(r#"[{"number": 18, "explanation": "두 번째 해설"}]"#)),
    ]);
    let explainer = Explainer::new(transport, Duration::from_secs(5));

    let (exam, _) = explainer.add_explanations(sample_exam()).await;
    assert_eq!(exam.questions[1].explanation.as_deref(), Some("첫 번째 해설"));

    let structural_before: Vec<_> = exam
        .questions
        .iter()
        .map(|q| (q.number, q.question_type.clone(), q.passage.clone(), q.choices.clone()))
        .collect();

    let (exam, _) = explainer.add_explanations(exam).await;
    assert_eq!(exam.questions[1].explanation.as_deref(), Some("두 번째 해설"));

    let structural_after: Vec<_> = exam
        .questions
        .iter()
        .map(|q| (q.number, q.question_type.clone(), q.passage.clone(), q.choices.clone()))
        .collect();
    assert_eq!(structural_before, structural_after);
}

#[tokio::test(start_paused = true)]
async fn exam_without_eligible_questions_skips_the_call() {
    let transport = RecordingTransport::new(vec![]);
    let explainer = Explainer::new(transport.clone(), Duration::from_secs(5));

    let mut exam = sample_exam();
    exam.questions.truncate(1);
    exam.exam_info.total_questions = 1;

    let (exam, usage) = explainer.add_explanations(exam).await;
    assert!(transport.prompts().is_empty(), "no LLM call for listening-only exams");
    assert!(exam.questions[0].explanation.is_none());
    assert_eq!(usage, TokenUsage::default());
}
