//! Answer-key parsing and cross-reference.
//!
//! Answer keys arrive as loosely formatted Markdown (`문제 N` headers with
//! circled-digit choice lines). The comparison report is a plain list of
//! findings consumed by the CLI; it never feeds back into validation.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::schema::{Choice, ParsedExam};

/// Ground-truth entry for a single question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub number: u32,
    pub question_text: String,
    pub passage: Option<String>,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerKey {
    pub entries: Vec<AnswerEntry>,
}

const CIRCLED_DIGITS: [(char, u8); 5] = [('①', 1), ('②', 2), ('③', 3), ('④', 4), ('⑤', 5)];

/// Parse an `answer.md` document into an [`AnswerKey`].
pub fn parse_answer_md(text: &str) -> AnswerKey {
    static HEADER_RE: OnceLock<Regex> = OnceLock::new();
    let header = HEADER_RE
        .get_or_init(|| Regex::new(r"(?m)^#{0,6}\s*문제\s+(\d+)").expect("header regex compiles"));

    let mut blocks: BTreeMap<u32, String> = BTreeMap::new();
    let matches: Vec<_> = header.captures_iter(text).collect();
    for (index, captures) in matches.iter().enumerate() {
        let Ok(number) = captures[1].parse::<u32>() else {
            continue;
        };
        let start = captures.get(0).map(|m| m.end()).unwrap_or(0);
        let end = matches
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        blocks.entry(number).or_insert_with(|| text[start..end].to_string());
    }

    let entries = blocks
        .into_iter()
        .map(|(number, block)| parse_block(number, &block))
        .collect();

    AnswerKey { entries }
}

fn parse_block(number: u32, block: &str) -> AnswerEntry {
    static STEM_RE: OnceLock<Regex> = OnceLock::new();
    static PASSAGE_RE: OnceLock<Regex> = OnceLock::new();
    let stem_re = STEM_RE.get_or_init(|| {
        Regex::new(r"(?:\*\*문제:\*\*|문제:)\s*(.+)").expect("stem regex compiles")
    });
    let passage_re = PASSAGE_RE.get_or_init(|| {
        Regex::new(r"(?:\*\*지문:\*\*|지문:)\s*((?s).+?)(?:\n\s*\n|$)").expect("passage regex compiles")
    });

    let question_text = stem_re
        .captures(block)
        .map(|c| normalize(&c[1]))
        .unwrap_or_default();

    let passage = passage_re
        .captures(block)
        .map(|c| normalize(&c[1]))
        .filter(|p| !p.is_empty());

    AnswerEntry {
        number,
        question_text,
        passage,
        choices: parse_choices(block),
    }
}

fn parse_choices(block: &str) -> Vec<Choice> {
    let mut choices = Vec::new();
    let mut seen = [false; 6];

    for line in block.lines() {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with("_(") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("- ") {
            line = rest.trim();
        }

        for (marker, number) in CIRCLED_DIGITS {
            if let Some(rest) = line.strip_prefix(marker) {
                if !seen[number as usize] {
                    choices.push(Choice {
                        number,
                        text: rest.trim().to_string(),
                    });
                    seen[number as usize] = true;
                }
                break;
            }
        }
    }

    choices.sort_by_key(|c| c.number);
    choices
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compare a parsed exam against the answer key, returning human-readable
/// findings for the CLI report.
pub fn cross_reference(exam: &ParsedExam, key: &AnswerKey) -> Vec<String> {
    let mut findings = Vec::new();

    for entry in &key.entries {
        match exam.question(entry.number) {
            None => findings.push(format!(
                "question {}: present in answer key but missing from parsed exam",
                entry.number
            )),
            Some(parsed) => {
                if !entry.choices.is_empty()
                    && !parsed.choices.is_empty()
                    && entry.choices.len() != parsed.choices.len()
                {
                    findings.push(format!(
                        "question {}: choice count mismatch (parsed={}, expected={})",
                        entry.number,
                        parsed.choices.len(),
                        entry.choices.len()
                    ));
                }
            }
        }
    }

    findings
}
