//! Projection of raw structuring output onto the exam schema.
//!
//! The structuring model returns JSON that is close to, but not always
//! exactly, the published schema. This pass coerces tolerable defects
//! (numeric strings, choices captured as one string, missing defaults,
//! group ranges written as `"41~42"`) and rejects the defects no repair can
//! fix without inventing content.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use super::schema::{
    Choice, ExamInfo, ExamType, GroupRange, ParsedExam, Question, QuestionType, VocabularyNote,
};
use super::validator::LISTENING_MAX;

/// Minimum length for a repeated passage to be treated as a shared group
/// passage rather than a coincidental duplicate.
const GROUP_PASSAGE_MIN_CHARS: usize = 20;

const IMAGE_MARKER: &str = "[IMAGE:";
const TABLE_MARKER: &str = "[TABLE:";

/// Irreparable defects in the raw structuring output.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("raw exam payload has invalid shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("question at position {index} is missing a number")]
    MissingNumber { index: usize },
    #[error("question at position {index} has invalid number {value}")]
    InvalidNumber { index: usize, value: i64 },
    #[error("duplicate question number {number}")]
    DuplicateNumber { number: u32 },
    #[error("question {number} is missing question text")]
    MissingQuestionText { number: u32 },
    #[error("question {number} has {found} choices after repair (expected 5)")]
    ChoiceCount { number: u32, found: usize },
}

#[derive(Debug, Default, Deserialize)]
struct RawExam {
    #[serde(default)]
    exam_info: RawExamInfo,
    #[serde(default)]
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Default, Deserialize)]
struct RawExamInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, deserialize_with = "flexible_int")]
    year: Option<i64>,
    #[serde(default, deserialize_with = "flexible_int")]
    month: Option<i64>,
    #[serde(default, deserialize_with = "flexible_int")]
    grade: Option<i64>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    exam_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawQuestion {
    #[serde(default, deserialize_with = "flexible_int")]
    number: Option<i64>,
    #[serde(default)]
    question_type: Option<String>,
    #[serde(default)]
    question_text: Option<String>,
    #[serde(default)]
    passage: Option<String>,
    #[serde(default)]
    choices: Option<RawChoices>,
    #[serde(default, deserialize_with = "flexible_int")]
    points: Option<i64>,
    #[serde(default)]
    vocabulary_notes: Vec<RawVocabularyNote>,
    #[serde(default)]
    has_image: Option<bool>,
    #[serde(default)]
    has_table: Option<bool>,
    #[serde(default)]
    image_description: Option<String>,
    #[serde(default)]
    sub_questions: Option<RawSubQuestions>,
    #[serde(default)]
    group_range: Option<RawGroupRange>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Choices arrive either as structured entries or as one string with
/// circled-digit markers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawChoices {
    Entries(Vec<RawChoice>),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    #[serde(default, deserialize_with = "flexible_int")]
    number: Option<i64>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVocabularyNote {
    #[serde(default)]
    word: Option<String>,
    #[serde(default)]
    meaning: Option<String>,
}

/// Group members arrive as nested question objects or as bare labels; bare
/// labels carry no structure we can place, so they are tolerated and dropped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSubQuestions {
    Questions(Vec<RawQuestion>),
    Labels(Vec<String>),
}

/// `[41, 42]`, `"41~42"` and `"41-42"` all denote the same range.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawGroupRange {
    Pair(Vec<i64>),
    Text(String),
}

fn flexible_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Int(i64),
        Float(f64),
        Text(String),
        Null,
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Int(value) => Ok(Some(value)),
        Flexible::Float(value) => Ok(Some(value as i64)),
        Flexible::Text(raw) => Ok(raw.trim().parse::<i64>().ok()),
        Flexible::Null => Ok(None),
    }
}

/// Build a repaired [`ParsedExam`] from raw structuring output.
pub fn project(raw: JsonValue) -> Result<ParsedExam, SchemaError> {
    let raw: RawExam = serde_json::from_value(raw)?;

    let mut questions = Vec::with_capacity(raw.questions.len());
    for (index, raw_question) in raw.questions.into_iter().enumerate() {
        flatten_question(raw_question, index, &mut questions)?;
    }

    let mut seen = HashSet::new();
    for question in &questions {
        if !seen.insert(question.number) {
            return Err(SchemaError::DuplicateNumber {
                number: question.number,
            });
        }
    }

    detect_passage_groups(&mut questions);

    let mut exam_info = project_exam_info(raw.exam_info);
    exam_info.total_questions = questions.len() as u32;

    Ok(ParsedExam {
        exam_info,
        questions,
    })
}

/// Project one raw question, hoisting numbered group members to the top
/// level so the whole `[a, b]` range is visible to the validator.
fn flatten_question(
    raw: RawQuestion,
    index: usize,
    out: &mut Vec<Question>,
) -> Result<(), SchemaError> {
    let (mut question, members) = project_question(raw, index)?;

    if !members.is_empty() {
        let mut numbers: Vec<u32> = members.iter().map(|m| m.number).collect();
        numbers.push(question.number);
        let first = numbers.iter().copied().min().unwrap_or(question.number);
        let last = numbers.iter().copied().max().unwrap_or(question.number);
        let range = GroupRange::new(first, last);

        question.group_range = Some(range);
        out.push(question);
        for mut member in members {
            member.group_range = Some(range);
            out.push(member);
        }
    } else {
        out.push(question);
    }
    Ok(())
}

fn project_question(
    raw: RawQuestion,
    index: usize,
) -> Result<(Question, Vec<Question>), SchemaError> {
    let number = match raw.number {
        Some(value) if value > 0 && value <= u32::MAX as i64 => value as u32,
        Some(value) => return Err(SchemaError::InvalidNumber { index, value }),
        None => return Err(SchemaError::MissingNumber { index }),
    };

    let question_type = match raw.question_type.as_deref().map(str::trim) {
        Some(label) if !label.is_empty() => QuestionType::from_label(label),
        _ if number <= LISTENING_MAX => QuestionType::Listening,
        _ => QuestionType::Other(String::new()),
    };

    let question_text = trimmed(raw.question_text);
    if question_text.is_empty() && !question_type.is_listening() {
        return Err(SchemaError::MissingQuestionText { number });
    }

    let passage = trimmed(raw.passage);

    let choices = repair_choices(raw.choices);
    if question_type.expects_five_choices() && choices.len() < 5 {
        return Err(SchemaError::ChoiceCount {
            number,
            found: choices.len(),
        });
    }

    let points = match raw.points {
        Some(value) if (1..=5).contains(&value) => value as u8,
        _ => 2,
    };

    let vocabulary_notes = raw
        .vocabulary_notes
        .into_iter()
        .filter_map(|note| {
            let word = trimmed(note.word);
            let meaning = trimmed(note.meaning);
            if word.is_empty() {
                None
            } else {
                Some(VocabularyNote { word, meaning })
            }
        })
        .collect();

    let image_description = raw
        .image_description
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    // Markdown markers are authoritative; explicit flags only widen.
    let has_image = raw.has_image.unwrap_or(false)
        || question_text.contains(IMAGE_MARKER)
        || passage.contains(IMAGE_MARKER);
    let has_table = raw.has_table.unwrap_or(false)
        || question_text.contains(TABLE_MARKER)
        || passage.contains(TABLE_MARKER);

    let group_range = raw.group_range.and_then(parse_group_range);

    let mut members = Vec::new();
    if let Some(RawSubQuestions::Questions(children)) = raw.sub_questions {
        for (child_index, child) in children.into_iter().enumerate() {
            let (child_question, grandchildren) = project_question(child, child_index)?;
            members.push(child_question);
            members.extend(grandchildren);
        }
    }

    let question = Question {
        number,
        question_type,
        question_text,
        passage,
        choices,
        points,
        vocabulary_notes,
        has_image,
        has_table,
        image_description,
        sub_questions: Vec::new(),
        group_range,
        explanation: raw
            .explanation
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()),
    };

    Ok((question, members))
}

fn project_exam_info(raw: RawExamInfo) -> ExamInfo {
    ExamInfo {
        title: trimmed(raw.title),
        year: raw
            .year
            .filter(|year| (1900..=2200).contains(year))
            .map(|year| year as i32),
        month: raw.month.filter(|month| (1..=12).contains(month)).map(|m| m as u8),
        grade: raw.grade.filter(|grade| (1..=3).contains(grade)).map(|g| g as u8),
        subject: trimmed(raw.subject),
        total_questions: 0,
        exam_type: raw.exam_type.as_deref().map(parse_exam_type),
    }
}

fn parse_exam_type(raw: &str) -> ExamType {
    match raw.trim() {
        "수능" => ExamType::Csat,
        "모의고사" => ExamType::MockExam,
        "워크북" => ExamType::Workbook,
        _ => ExamType::Other,
    }
}

fn trimmed(value: Option<String>) -> String {
    value.map(|text| text.trim().to_string()).unwrap_or_default()
}

fn repair_choices(raw: Option<RawChoices>) -> Vec<Choice> {
    match raw {
        None => Vec::new(),
        Some(RawChoices::Entries(entries)) => {
            let mut choices: Vec<Choice> = entries
                .into_iter()
                .filter_map(|entry| {
                    let text = trimmed(entry.text);
                    if text.is_empty() {
                        None
                    } else {
                        Some(Choice {
                            number: entry.number.unwrap_or(0).clamp(0, u8::MAX as i64) as u8,
                            text,
                        })
                    }
                })
                .collect();

            let numbers: Vec<u8> = choices.iter().map(|c| c.number).collect();
            let mut expected: Vec<u8> = (1..=choices.len() as u8).collect();
            let mut sorted = numbers.clone();
            sorted.sort_unstable();
            expected.sort_unstable();
            if sorted != expected {
                for (position, choice) in choices.iter_mut().enumerate() {
                    choice.number = position as u8 + 1;
                }
            }
            choices
        }
        Some(RawChoices::Text(text)) => split_circled_choices(&text),
    }
}

/// Split a flat choice blob on circled-digit markers, renumbering 1..=5.
pub(crate) fn split_circled_choices(text: &str) -> Vec<Choice> {
    static MARKER_RE: OnceLock<Regex> = OnceLock::new();
    let marker = MARKER_RE.get_or_init(|| Regex::new("[①②③④⑤]").expect("marker regex compiles"));

    let mut pieces = Vec::new();
    let mut boundaries: Vec<usize> = marker.find_iter(text).map(|m| m.start()).collect();
    boundaries.push(text.len());

    for window in boundaries.windows(2) {
        let piece = &text[window[0]..window[1]];
        let body: String = piece.chars().skip(1).collect();
        let body = body.trim();
        if !body.is_empty() {
            pieces.push(body.to_string());
        }
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(position, text)| Choice {
            number: position as u8 + 1,
            text,
        })
        .collect()
}

fn parse_group_range(raw: RawGroupRange) -> Option<GroupRange> {
    static RANGE_RE: OnceLock<Regex> = OnceLock::new();
    let range_re =
        RANGE_RE.get_or_init(|| Regex::new(r"(\d+)\s*[~\-]\s*(\d+)").expect("range regex compiles"));

    match raw {
        RawGroupRange::Pair(values) => {
            if values.len() == 2 && values[0] > 0 && values[1] > 0 {
                Some(GroupRange::new(values[0] as u32, values[1] as u32))
            } else {
                None
            }
        }
        RawGroupRange::Text(text) => {
            let captures = range_re.captures(&text)?;
            let first = captures[1].parse::<u32>().ok()?;
            let last = captures[2].parse::<u32>().ok()?;
            Some(GroupRange::new(first, last))
        }
    }
}

/// Assign group ranges to consecutive runs sharing one long passage when the
/// model expressed grouping by repetition instead of an explicit range.
fn detect_passage_groups(questions: &mut [Question]) {
    let mut start = 0;
    while start < questions.len() {
        let passage = questions[start].passage.clone();
        let mut end = start + 1;

        let groupable = questions[start].group_range.is_none()
            && passage.chars().count() >= GROUP_PASSAGE_MIN_CHARS;

        if groupable {
            while end < questions.len()
                && questions[end].group_range.is_none()
                && questions[end].passage == passage
                && questions[end].number == questions[end - 1].number + 1
            {
                end += 1;
            }
        }

        if groupable && end - start >= 2 {
            let range = GroupRange::new(questions[start].number, questions[end - 1].number);
            for question in &mut questions[start..end] {
                question.group_range = Some(range);
            }
        }

        start = end;
    }
}
