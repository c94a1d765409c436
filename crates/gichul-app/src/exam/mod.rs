//! Domain model for parsed exams.
//!
//! Types here stay pure: they model the structured contract produced by the
//! LLM structuring layer, provide JSON schema generation for prompting, and
//! expose repair (projector) and validation passes so downstream code never
//! publishes a malformed exam.

pub mod answer_key;
pub mod projector;
pub mod schema;
pub mod validator;

pub use answer_key::{AnswerEntry, AnswerKey, cross_reference, parse_answer_md};
pub use projector::{SchemaError, project};
pub use schema::{
    Choice, ExamInfo, ExamType, GroupRange, ParsedExam, Question, QuestionType, VocabularyNote,
};
pub use validator::{
    CheckCode, IssueLevel, LISTENING_MAX, ValidationIssue, ValidationResult, validate,
};
