//! Structured representation of a parsed exam booklet.

use std::fmt;

use schemars::JsonSchema;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::Display;

/// Question categories printed on Korean exam booklets.
///
/// The 22 recognised tags serialize as their Korean labels. Tags the
/// structuring model invents are carried through as [`QuestionType::Other`]
/// so the validator can report them instead of the deserializer rejecting
/// the whole payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QuestionType {
    Listening,
    Vocabulary,
    Grammar,
    Purpose,
    Implication,
    MainIdea,
    Title,
    MoodChange,
    Claim,
    BlankFill,
    Order,
    Insert,
    Summary,
    Irrelevant,
    Reference,
    ContentMatch,
    GraphTable,
    LongPassage,
    Writing,
    ErrorCorrection,
    Rearrange,
    Rewrite,
    Other(String),
}

impl QuestionType {
    pub const TAGS: [&'static str; 22] = [
        "듣기",
        "어휘",
        "문법",
        "목적",
        "함의",
        "주제/요지",
        "제목",
        "심경변화",
        "주장",
        "빈칸",
        "순서",
        "삽입",
        "요약",
        "무관한문장",
        "지칭",
        "내용일치",
        "도표",
        "장문",
        "서술형",
        "오류수정",
        "배열",
        "문장전환",
    ];

    pub fn label(&self) -> &str {
        match self {
            QuestionType::Listening => "듣기",
            QuestionType::Vocabulary => "어휘",
            QuestionType::Grammar => "문법",
            QuestionType::Purpose => "목적",
            QuestionType::Implication => "함의",
            QuestionType::MainIdea => "주제/요지",
            QuestionType::Title => "제목",
            QuestionType::MoodChange => "심경변화",
            QuestionType::Claim => "주장",
            QuestionType::BlankFill => "빈칸",
            QuestionType::Order => "순서",
            QuestionType::Insert => "삽입",
            QuestionType::Summary => "요약",
            QuestionType::Irrelevant => "무관한문장",
            QuestionType::Reference => "지칭",
            QuestionType::ContentMatch => "내용일치",
            QuestionType::GraphTable => "도표",
            QuestionType::LongPassage => "장문",
            QuestionType::Writing => "서술형",
            QuestionType::ErrorCorrection => "오류수정",
            QuestionType::Rearrange => "배열",
            QuestionType::Rewrite => "문장전환",
            QuestionType::Other(raw) => raw.as_str(),
        }
    }

    pub fn from_label(raw: &str) -> Self {
        match raw.trim() {
            "듣기" => QuestionType::Listening,
            "어휘" => QuestionType::Vocabulary,
            "문법" => QuestionType::Grammar,
            "목적" => QuestionType::Purpose,
            "함의" => QuestionType::Implication,
            "주제/요지" => QuestionType::MainIdea,
            "제목" => QuestionType::Title,
            "심경변화" => QuestionType::MoodChange,
            "주장" => QuestionType::Claim,
            "빈칸" => QuestionType::BlankFill,
            "순서" => QuestionType::Order,
            "삽입" => QuestionType::Insert,
            "요약" => QuestionType::Summary,
            "무관한문장" => QuestionType::Irrelevant,
            "지칭" => QuestionType::Reference,
            "내용일치" => QuestionType::ContentMatch,
            "도표" => QuestionType::GraphTable,
            "장문" => QuestionType::LongPassage,
            "서술형" => QuestionType::Writing,
            "오류수정" => QuestionType::ErrorCorrection,
            "배열" => QuestionType::Rearrange,
            "문장전환" => QuestionType::Rewrite,
            other => QuestionType::Other(other.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, QuestionType::Other(_))
    }

    pub fn is_listening(&self) -> bool {
        matches!(self, QuestionType::Listening)
    }

    /// Written-response forms answer without printed choices.
    pub fn is_written_response(&self) -> bool {
        matches!(
            self,
            QuestionType::Writing
                | QuestionType::ErrorCorrection
                | QuestionType::Rearrange
                | QuestionType::Rewrite
        )
    }

    /// Whether the question must carry exactly five circled-digit choices.
    pub fn expects_five_choices(&self) -> bool {
        self.is_known() && !self.is_written_response()
    }

    /// Types that read a printed passage; used for content-quality checks.
    pub fn requires_passage(&self) -> bool {
        matches!(
            self,
            QuestionType::Purpose
                | QuestionType::Implication
                | QuestionType::MainIdea
                | QuestionType::Title
                | QuestionType::MoodChange
                | QuestionType::Claim
                | QuestionType::BlankFill
                | QuestionType::Order
                | QuestionType::Insert
                | QuestionType::Summary
                | QuestionType::Irrelevant
                | QuestionType::Reference
                | QuestionType::ContentMatch
                | QuestionType::LongPassage
        )
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for QuestionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for QuestionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(QuestionType::from_label(&raw))
    }
}

impl JsonSchema for QuestionType {
    fn schema_name() -> String {
        "QuestionType".to_string()
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            enum_values: Some(
                Self::TAGS
                    .iter()
                    .map(|tag| JsonValue::String((*tag).to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
        .into()
    }
}

/// Detected exam format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display)]
pub enum ExamType {
    #[serde(rename = "수능")]
    #[strum(serialize = "수능")]
    Csat,
    #[serde(rename = "모의고사")]
    #[strum(serialize = "모의고사")]
    MockExam,
    #[serde(rename = "워크북")]
    #[strum(serialize = "워크북")]
    Workbook,
    #[serde(rename = "기타")]
    #[strum(serialize = "기타")]
    Other,
}

/// One multiple-choice option, numbered after its circled-digit marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Choice {
    pub number: u8,
    pub text: String,
}

/// A starred vocabulary gloss printed under the passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VocabularyNote {
    pub word: String,
    pub meaning: String,
}

/// Inclusive range of question numbers sharing one passage, e.g. `[41, 42]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GroupRange(pub u32, pub u32);

impl GroupRange {
    pub fn new(first: u32, last: u32) -> Self {
        if first <= last {
            GroupRange(first, last)
        } else {
            GroupRange(last, first)
        }
    }

    pub fn first(&self) -> u32 {
        self.0
    }

    pub fn last(&self) -> u32 {
        self.1
    }

    pub fn contains(&self, number: u32) -> bool {
        self.0 <= number && number <= self.1
    }
}

impl fmt::Display for GroupRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.0, self.1)
    }
}

fn default_points() -> u8 {
    2
}

/// One exam problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Question {
    pub number: u32,
    pub question_type: QuestionType,
    pub question_text: String,
    #[serde(default)]
    pub passage: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default = "default_points")]
    pub points: u8,
    #[serde(default)]
    pub vocabulary_notes: Vec<VocabularyNote>,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default)]
    pub has_table: bool,
    #[serde(default)]
    pub image_description: Option<String>,
    #[serde(default)]
    pub sub_questions: Vec<Question>,
    #[serde(default)]
    pub group_range: Option<GroupRange>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl Question {
    /// Whether the explainer can produce a meaningful write-up.
    pub fn is_explainable(&self) -> bool {
        if self.question_type.is_listening() {
            return false;
        }
        !self.passage.is_empty() || !self.choices.is_empty()
    }
}

/// Booklet-level metadata, fixed once the questions are finalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExamInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u8>,
    #[serde(default)]
    pub grade: Option<u8>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default)]
    pub exam_type: Option<ExamType>,
}

/// The full structured result of parsing one PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParsedExam {
    pub exam_info: ExamInfo,
    pub questions: Vec<Question>,
}

impl ParsedExam {
    /// Generate the JSON schema handed to the structuring model.
    pub fn schema() -> JsonValue {
        let schema = schemars::schema_for!(ParsedExam);
        serde_json::to_value(&schema).expect("schema is serializable")
    }

    pub fn question(&self, number: u32) -> Option<&Question> {
        self.questions.iter().find(|q| q.number == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_labels() {
        for tag in QuestionType::TAGS {
            let parsed = QuestionType::from_label(tag);
            assert!(parsed.is_known(), "tag {tag} must be recognised");
            assert_eq!(parsed.label(), tag);
        }
        assert_eq!(QuestionType::TAGS.len(), 22);
    }

    #[test]
    fn unknown_tag_is_carried_through() {
        let parsed = QuestionType::from_label("기타");
        assert!(!parsed.is_known());
        assert_eq!(parsed.label(), "기타");
        assert!(!parsed.expects_five_choices());
    }

    #[test]
    fn written_types_skip_choice_requirement() {
        for label in ["서술형", "오류수정", "배열", "문장전환"] {
            let parsed = QuestionType::from_label(label);
            assert!(parsed.is_written_response(), "{label}");
            assert!(!parsed.expects_five_choices(), "{label}");
        }
        assert!(QuestionType::Listening.expects_five_choices());
        assert!(QuestionType::BlankFill.expects_five_choices());
    }

    #[test]
    fn question_type_serializes_as_korean_label() {
        let json = serde_json::to_string(&QuestionType::MainIdea).expect("serialize");
        assert_eq!(json, "\"주제/요지\"");
        let back: QuestionType = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, QuestionType::MainIdea);
    }

    #[test]
    fn group_range_normalizes_order() {
        let range = GroupRange::new(45, 43);
        assert_eq!(range.first(), 43);
        assert_eq!(range.last(), 45);
        assert!(range.contains(44));
        assert!(!range.contains(46));
        assert_eq!(range.to_string(), "43~45");
    }

    #[test]
    fn group_range_serializes_as_pair() {
        let json = serde_json::to_string(&GroupRange::new(41, 42)).expect("serialize");
        assert_eq!(json, "[41,42]");
    }

    #[test]
    fn schema_generation_succeeds() {
        let schema = ParsedExam::schema();
        assert!(schema.is_object());
        let rendered = schema.to_string();
        assert!(rendered.contains("듣기"));
        assert!(rendered.contains("questions"));
    }
}
