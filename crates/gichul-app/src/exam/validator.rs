//! Structural and semantic validation of a repaired exam.
//!
//! Checks never mutate the exam. Every check carries a stable code so tests
//! and API consumers can assert specific failures.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use strum::Display;

use super::schema::{ParsedExam, Question};

/// Listening questions occupy numbers 1..=17 on current CSAT English forms.
pub const LISTENING_MAX: u32 = 17;

/// Passages shorter than this are suspicious for passage-reading types.
const MIN_PASSAGE_CHARS: usize = 20;

const IMAGE_MARKER: &str = "[IMAGE:";

/// Stable identifiers for every validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CheckCode {
    #[strum(serialize = "V-SCHEMA-001")]
    PointsRange,
    #[strum(serialize = "V-SCHEMA-002")]
    UnknownQuestionType,
    #[strum(serialize = "V-SCHEMA-003")]
    MissingQuestionText,
    #[strum(serialize = "V-NUM-001")]
    NumbersNotIncreasing,
    #[strum(serialize = "V-NUM-002")]
    NumberGap,
    #[strum(serialize = "V-NUM-003")]
    TotalMismatch,
    #[strum(serialize = "V-CHOICE-001")]
    ChoiceCount,
    #[strum(serialize = "V-CHOICE-002")]
    ChoiceNumbering,
    #[strum(serialize = "V-CHOICE-003")]
    EmptyChoiceText,
    #[strum(serialize = "V-CHOICE-004")]
    DuplicateChoiceText,
    #[strum(serialize = "V-LIST-001")]
    ListeningNumberRange,
    #[strum(serialize = "V-LIST-002")]
    ListeningRangeType,
    #[strum(serialize = "V-LIST-003")]
    ListeningPassage,
    #[strum(serialize = "V-GROUP-001")]
    GroupMembership,
    #[strum(serialize = "V-GROUP-002")]
    GroupPassage,
    #[strum(serialize = "V-QUAL-001")]
    DuplicateQuestionText,
    #[strum(serialize = "V-QUAL-002")]
    ShortPassage,
    #[strum(serialize = "V-QUAL-003")]
    ImageFlagWithoutMarker,
}

impl Serialize for CheckCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IssueLevel {
    Error,
    Warning,
}

/// One validation finding, tagged with a question number when applicable.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub code: CheckCode,
    pub question_number: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_code(&self, code: CheckCode) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|issue| issue.code == code)
    }

    fn error(&mut self, code: CheckCode, question_number: Option<u32>, message: String) {
        self.errors.push(ValidationIssue {
            level: IssueLevel::Error,
            code,
            question_number,
            message,
        });
    }

    fn warning(&mut self, code: CheckCode, question_number: Option<u32>, message: String) {
        self.warnings.push(ValidationIssue {
            level: IssueLevel::Warning,
            code,
            question_number,
            message,
        });
    }
}

/// Run every check against the exam.
pub fn validate(exam: &ParsedExam) -> ValidationResult {
    let mut result = ValidationResult::default();

    check_schema(exam, &mut result);
    check_numbering(exam, &mut result);
    check_choices(exam, &mut result);
    check_listening(exam, &mut result);
    check_groups(exam, &mut result);
    check_quality(exam, &mut result);

    result
}

fn check_schema(exam: &ParsedExam, result: &mut ValidationResult) {
    for question in &exam.questions {
        if !(1..=5).contains(&question.points) {
            result.error(
                CheckCode::PointsRange,
                Some(question.number),
                format!(
                    "question {}: points {} outside [1, 5]",
                    question.number, question.points
                ),
            );
        }

        if !question.question_type.is_known() {
            result.error(
                CheckCode::UnknownQuestionType,
                Some(question.number),
                format!(
                    "question {}: unrecognised question type `{}`",
                    question.number,
                    question.question_type.label()
                ),
            );
        }

        if question.question_text.trim().is_empty() && !question.question_type.is_listening() {
            result.error(
                CheckCode::MissingQuestionText,
                Some(question.number),
                format!("question {}: missing question text", question.number),
            );
        }
    }
}

fn check_numbering(exam: &ParsedExam, result: &mut ValidationResult) {
    for pair in exam.questions.windows(2) {
        if pair[1].number <= pair[0].number {
            result.error(
                CheckCode::NumbersNotIncreasing,
                Some(pair[1].number),
                format!(
                    "question numbers not strictly increasing: {} follows {}",
                    pair[1].number, pair[0].number
                ),
            );
        }
    }

    let numbers: BTreeSet<u32> = exam.questions.iter().map(|q| q.number).collect();
    if let Some(max) = numbers.iter().next_back().copied() {
        let missing: Vec<String> = (1..=max)
            .filter(|n| !numbers.contains(n))
            .map(|n| n.to_string())
            .collect();
        if !missing.is_empty() {
            result.warning(
                CheckCode::NumberGap,
                None,
                format!("missing question numbers: {}", missing.join(", ")),
            );
        }
    }

    let total = exam.questions.len() as u32;
    if exam.exam_info.total_questions != total {
        result.error(
            CheckCode::TotalMismatch,
            None,
            format!(
                "exam_info.total_questions is {} but {} questions are present",
                exam.exam_info.total_questions, total
            ),
        );
    }
}

fn check_choices(exam: &ParsedExam, result: &mut ValidationResult) {
    for question in &exam.questions {
        if question.question_type.expects_five_choices() && question.choices.len() != 5 {
            result.error(
                CheckCode::ChoiceCount,
                Some(question.number),
                format!(
                    "question {}: has {} choices (expected 5)",
                    question.number,
                    question.choices.len()
                ),
            );
        }

        if !question.choices.is_empty() {
            let mut numbers: Vec<u8> = question.choices.iter().map(|c| c.number).collect();
            numbers.sort_unstable();
            if numbers != [1, 2, 3, 4, 5] {
                result.error(
                    CheckCode::ChoiceNumbering,
                    Some(question.number),
                    format!(
                        "question {}: choice numbers {:?} are not exactly 1..=5",
                        question.number,
                        question.choices.iter().map(|c| c.number).collect::<Vec<_>>()
                    ),
                );
            }
        }

        let mut seen_texts = HashMap::new();
        for choice in &question.choices {
            if choice.text.trim().is_empty() {
                result.error(
                    CheckCode::EmptyChoiceText,
                    Some(question.number),
                    format!(
                        "question {}, choice {}: empty choice text",
                        question.number, choice.number
                    ),
                );
            }

            if let Some(previous) = seen_texts.insert(choice.text.trim(), choice.number) {
                result.error(
                    CheckCode::DuplicateChoiceText,
                    Some(question.number),
                    format!(
                        "question {}: choices {} and {} share the same text",
                        question.number, previous, choice.number
                    ),
                );
            }
        }
    }
}

fn check_listening(exam: &ParsedExam, result: &mut ValidationResult) {
    for question in &exam.questions {
        if question.question_type.is_listening() {
            if !(1..=LISTENING_MAX).contains(&question.number) {
                result.error(
                    CheckCode::ListeningNumberRange,
                    Some(question.number),
                    format!(
                        "question {}: listening questions must be numbered 1..={LISTENING_MAX}",
                        question.number
                    ),
                );
            }

            if !question.passage.is_empty() {
                result.error(
                    CheckCode::ListeningPassage,
                    Some(question.number),
                    format!(
                        "question {}: listening questions carry no written passage",
                        question.number
                    ),
                );
            }
        } else if (1..=LISTENING_MAX).contains(&question.number) {
            result.warning(
                CheckCode::ListeningRangeType,
                Some(question.number),
                format!(
                    "question {}: numbered in the listening range but typed `{}`",
                    question.number,
                    question.question_type.label()
                ),
            );
        }
    }
}

fn check_groups(exam: &ParsedExam, result: &mut ValidationResult) {
    let mut groups: BTreeMap<(u32, u32), Vec<&Question>> = BTreeMap::new();

    for question in &exam.questions {
        let Some(range) = question.group_range else {
            continue;
        };

        if !range.contains(question.number) {
            result.error(
                CheckCode::GroupMembership,
                Some(question.number),
                format!(
                    "question {}: outside its own group range {range}",
                    question.number
                ),
            );
        }

        groups
            .entry((range.first(), range.last()))
            .or_default()
            .push(question);
    }

    for ((first, last), members) in groups {
        let numbers: BTreeSet<u32> = members.iter().map(|q| q.number).collect();
        let missing: Vec<String> = (first..=last)
            .filter(|n| !numbers.contains(n))
            .map(|n| n.to_string())
            .collect();
        if !missing.is_empty() {
            result.error(
                CheckCode::GroupMembership,
                None,
                format!(
                    "group {first}~{last}: members {} missing or carrying a different range",
                    missing.join(", ")
                ),
            );
        }

        if let Some(head) = members.iter().find(|q| q.number == first) {
            if head.passage.trim().is_empty() {
                result.error(
                    CheckCode::GroupPassage,
                    Some(first),
                    format!("group {first}~{last}: first member carries no shared passage"),
                );
            }
        }
    }
}

fn check_quality(exam: &ParsedExam, result: &mut ValidationResult) {
    let mut stems: HashMap<&str, u32> = HashMap::new();
    for question in &exam.questions {
        let stem = question.question_text.trim();
        if stem.is_empty() {
            continue;
        }
        if let Some(previous) = stems.insert(stem, question.number) {
            result.warning(
                CheckCode::DuplicateQuestionText,
                Some(question.number),
                format!(
                    "question {}: same question text as question {}",
                    question.number, previous
                ),
            );
        }
    }

    for question in &exam.questions {
        let in_group_tail = question
            .group_range
            .map(|range| range.first() != question.number)
            .unwrap_or(false);
        if question.question_type.requires_passage()
            && !in_group_tail
            && question.passage.chars().count() < MIN_PASSAGE_CHARS
        {
            result.warning(
                CheckCode::ShortPassage,
                Some(question.number),
                format!(
                    "question {}: passage under {MIN_PASSAGE_CHARS} characters for a passage-reading type",
                    question.number
                ),
            );
        }

        if question.has_image
            && !question.passage.contains(IMAGE_MARKER)
            && !question.question_text.contains(IMAGE_MARKER)
        {
            result.warning(
                CheckCode::ImageFlagWithoutMarker,
                Some(question.number),
                format!(
                    "question {}: has_image set but no image marker present",
                    question.number
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::schema::{Choice, ExamInfo, GroupRange, QuestionType};

    fn five_choices() -> Vec<Choice> {
        (1..=5)
            .map(|number| Choice {
                number,
                text: format!("선택지 {number}"),
            })
            .collect()
    }

    fn question(number: u32, question_type: QuestionType) -> Question {
        Question {
            number,
            question_type,
            question_text: format!("문제 {number}의 지시문으로 가장 적절한 것은?"),
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
        }
    }

    fn exam_of(questions: Vec<Question>) -> ParsedExam {
        ParsedExam {
            exam_info: ExamInfo {
                title: "연습 시험지".to_string(),
                total_questions: questions.len() as u32,
                ..Default::default()
            },
            questions,
        }
    }

    #[test]
    fn clean_exam_passes() {
        let mut reading = question(18, QuestionType::Purpose);
        reading.passage =
            "Dear residents, we are writing to inform you of upcoming maintenance work.".into();
        let exam = exam_of(vec![question(1, QuestionType::Listening), reading]);

        let result = validate(&exam);
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn listening_numbered_18_is_an_error() {
        let exam = exam_of(vec![question(18, QuestionType::Listening)]);
        let result = validate(&exam);
        assert!(result.has_code(CheckCode::ListeningNumberRange));
        assert!(!result.is_valid());
    }

    #[test]
    fn listening_with_passage_is_an_error() {
        let mut q = question(2, QuestionType::Listening);
        q.passage = "This passage must not exist for a listening question.".into();
        let result = validate(&exam_of(vec![q]));
        assert!(result.has_code(CheckCode::ListeningPassage));
    }

    #[test]
    fn non_listening_in_listening_range_is_only_a_warning() {
        let mut q = question(3, QuestionType::Grammar);
        q.passage = "A grammar passage that is comfortably long enough for checks.".into();
        let result = validate(&exam_of(vec![q]));
        assert!(result.is_valid());
        assert!(result.has_code(CheckCode::ListeningRangeType));
    }

    #[test]
    fn choice_defects_are_reported() {
        let mut q = question(20, QuestionType::Claim);
        q.passage = "A passage that is comfortably long enough for quality checks.".into();
        q.choices.truncate(4);
        q.choices[1].text = q.choices[0].text.clone();
        q.choices[2].text = "  ".into();

        let result = validate(&exam_of(vec![q]));
        assert!(result.has_code(CheckCode::ChoiceCount));
        assert!(result.has_code(CheckCode::ChoiceNumbering));
        assert!(result.has_code(CheckCode::EmptyChoiceText));
        assert!(result.has_code(CheckCode::DuplicateChoiceText));
    }

    #[test]
    fn numbering_defects_are_reported() {
        let mut first = question(21, QuestionType::Title);
        first.passage = "A passage that is comfortably long enough for quality checks.".into();
        let mut second = question(21, QuestionType::Title);
        second.passage = first.passage.clone();
        second.question_text = "다른 지시문으로 가장 적절한 것은?".into();

        let mut exam = exam_of(vec![first, second]);
        exam.exam_info.total_questions = 5;

        let result = validate(&exam);
        assert!(result.has_code(CheckCode::NumbersNotIncreasing));
        assert!(result.has_code(CheckCode::TotalMismatch));
        assert!(result.has_code(CheckCode::NumberGap));
    }

    #[test]
    fn group_invariants_hold_for_complete_groups() {
        let shared = "A shared passage for the grouped questions, long enough to satisfy checks.";
        let mut head = question(41, QuestionType::Title);
        head.passage = shared.into();
        head.group_range = Some(GroupRange(41, 42));
        let mut tail = question(42, QuestionType::Vocabulary);
        tail.group_range = Some(GroupRange(41, 42));
        tail.question_text = "밑줄 친 (a)~(e) 중에서 쓰임이 적절하지 않은 것은?".into();

        let result = validate(&exam_of(vec![head, tail]));
        assert!(
            !result.has_code(CheckCode::GroupMembership),
            "{:?}",
            result.errors
        );
        assert!(!result.has_code(CheckCode::GroupPassage));
    }

    #[test]
    fn incomplete_group_is_an_error() {
        let mut head = question(43, QuestionType::LongPassage);
        head.passage = "A shared passage for a grouped run, long enough for the checks here.".into();
        head.group_range = Some(GroupRange(43, 45));

        let result = validate(&exam_of(vec![head]));
        assert!(result.has_code(CheckCode::GroupMembership));
    }

    #[test]
    fn group_head_without_passage_is_an_error() {
        let mut head = question(41, QuestionType::Title);
        head.group_range = Some(GroupRange(41, 42));
        let mut tail = question(42, QuestionType::Vocabulary);
        tail.group_range = Some(GroupRange(41, 42));
        tail.question_text = "밑줄 친 낱말의 쓰임이 적절하지 않은 것은?".into();

        let result = validate(&exam_of(vec![head, tail]));
        assert!(result.has_code(CheckCode::GroupPassage));
    }

    #[test]
    fn quality_checks_warn_only() {
        let mut short_passage = question(22, QuestionType::Summary);
        short_passage.passage = "too short".into();
        let mut flagged = question(23, QuestionType::GraphTable);
        flagged.has_image = true;
        flagged.passage =
            "A chart description that is long enough but carries no marker at all.".into();
        flagged.question_text = "다음 도표의 내용과 일치하지 않는 것은?".into();

        let result = validate(&exam_of(vec![short_passage, flagged]));
        assert!(result.is_valid());
        assert!(result.has_code(CheckCode::ShortPassage));
        assert!(result.has_code(CheckCode::ImageFlagWithoutMarker));
    }

    #[test]
    fn unknown_type_and_points_are_schema_errors() {
        let mut q = question(24, QuestionType::Other("신유형".into()));
        q.points = 6;
        q.passage = "A passage that is comfortably long enough for quality checks.".into();

        let result = validate(&exam_of(vec![q]));
        assert!(result.has_code(CheckCode::UnknownQuestionType));
        assert!(result.has_code(CheckCode::PointsRange));
    }
}
