//! Prompts for the structuring and explanation layers.
//!
//! Kept as literal resources so prompt changes never hide inside string
//! construction logic.

use crate::exam::Question;

/// System prompt for projecting extracted Markdown onto the exam schema.
pub const PARSING_PROMPT: &str = "\
시험지에서 추출한 텍스트를 분석하여 모든 문제를 정확하게 구조화하는 전문 파싱 시스템입니다.

## 작업
추출 텍스트에서 모든 문제를 찾아 구조화된 JSON으로 반환하세요.

## exam_info 필드
- title: 시험지 상단의 정확한 제목 텍스트 (예: \"2026학년도 대학수학능력시험 9월 모의평가 문제지\")
- year: 연도 (예: 2026학년도 → 2026)
- month: 월 (예: 9월 → 9)
- grade: 학년/교시 (예: 고3 또는 제3교시 → 3)
- subject: 감지된 과목명 (영어, 수학, 과학 등)
- exam_type: \"수능\", \"모의고사\", \"워크북\" 중 하나 (판단 불가 시 \"기타\")
- total_questions: 추출된 문제 총 개수 (고정값 가정 금지)

## questions 필드
- number: 인쇄된 문제 번호
- question_text: 문제 지시문 (인쇄된 그대로)
- question_type: 다음 22개 유형 중 가장 적합한 값
  듣기, 어휘, 문법, 목적, 함의, 주제/요지, 제목, 심경변화, 주장, 빈칸,
  순서, 삽입, 요약, 무관한문장, 지칭, 내용일치, 도표, 장문, 서술형,
  오류수정, 배열, 문장전환
- passage: 지문/자료 전체 텍스트 그대로 (없으면 빈 문자열)
- choices: 선택지 배열, 각 항목 {number: int, text: str}
  - 원문자 ①②③④⑤ → 1,2,3,4,5
- points: 배점 (기본 2; [3점] 표시 시 3)
- vocabulary_notes: 별표(*) 단어와 뜻 → {word: str, meaning: str}
- has_image: 그림/도표/그래프 존재 시 true
- has_table: 표/차트 존재 시 true
- image_description: has_image 또는 has_table이 true이면 간략한 설명
- group_range: 지문 공유 문제군 범위 (예: [41, 42], [43, 45])
- sub_questions: 묶음 문제의 세부 문항 목록

## 듣기 문제 규칙
1. 듣기 문제는 반드시 번호 1~17 범위에 있음
2. passage는 항상 빈 문자열 (지문 없음)
3. 선택지는 항상 5개 (①~⑤)
4. 지시문과 선택지만 추출

## 특수 케이스
1. 묶음 문제 [41~42] 등: 첫 번째 문제에 공유 지문; 모든 문제에 동일 group_range
2. 빈칸: ________ 로 표시
3. 순서 배열: (A),(B),(C) 문단 모두 passage에 포함
4. 밑줄 텍스트: __텍스트__ 형식으로 보존
5. 페이지 걸친 문제: 완전하게 추출

## 연습 문제지 / 워크북 지원
- 연습 문제지(Final Test, Chapter Test 등)는 서술형 문제를 포함할 수 있음
- 서술형(답을 직접 작성): choices는 빈 배열 [], question_type은 적절한 유형 사용
  - \"서술형\": 일반 서술형 문제
  - \"오류수정\": 어법상 틀린 부분 고치기 (예: \"bitterly → bitter\")
  - \"배열\": 주어진 단어를 올바른 순서로 배열
  - \"문장전환\": 같은 의미의 문장으로 다시 쓰기
- 객관식이 아닌 문제도 반드시 추출 (choices를 빈 배열로 설정)
- 문제 지시문(예: \"어법상 틀린 부분을 바르게 고쳐 쓰시오\")은 question_text에 보존
- 영어 문장은 passage 필드에 넣고, 한국어 지시문은 question_text에 넣기

## 품질 요구사항
- 모든 문제 누락 없이 추출
- 텍스트는 인쇄된 그대로 (의역 금지)
- 한국어/영어 모두 정확하게 (OCR 오류 없이)
- 지문은 잘림 없이 완전하게
";

/// Attach the extracted Markdown to the parsing prompt.
pub fn build_structuring_prompt(markdown: &str) -> String {
    format!(
        "{PARSING_PROMPT}\n## 추출 텍스트\n아래는 시험지에서 추출한 원본 텍스트입니다.\n이 텍스트를 분석하여 구조화하세요. 추출 오류는 문맥에 맞게 교정하세요.\n\n{markdown}\n"
    )
}

/// Build the single batched explanation prompt for the given questions.
pub fn build_explanation_prompt(questions: &[&Question]) -> String {
    let mut lines = vec![
        "다음 시험 문제들에 대한 해설을 JSON 형식으로 작성해 주세요.".to_string(),
        "각 문제마다 다음 항목을 포함하세요:".to_string(),
        "  1. 정답 근거 (answer rationale)".to_string(),
        "  2. 핵심 문법/어휘 포인트 (key grammar/vocabulary points)".to_string(),
        "  3. 오답 분석 (wrong answer analysis for MCQ, if applicable)".to_string(),
        String::new(),
        "응답 형식 (JSON array, 문제 번호 순서대로):".to_string(),
        "[{\"number\": <문제번호>, \"explanation\": \"<해설 텍스트>\"}, ...]".to_string(),
        String::new(),
        "문제 목록:".to_string(),
        String::new(),
    ];

    for question in questions {
        lines.push(format!("### 문제 {}", question.number));
        lines.push(format!("유형: {}", question.question_type));
        lines.push(format!("문제: {}", question.question_text));
        if !question.passage.is_empty() {
            lines.push(format!("지문:\n{}", question.passage));
        }
        if !question.choices.is_empty() {
            lines.push("선택지:".to_string());
            for choice in &question.choices {
                lines.push(format!("  {}. {}", choice.number, choice.text));
            }
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::{Question, QuestionType};

    #[test]
    fn parsing_prompt_enumerates_every_tag() {
        for tag in QuestionType::TAGS {
            assert!(PARSING_PROMPT.contains(tag), "prompt must mention {tag}");
        }
        assert!(PARSING_PROMPT.contains("1~17"));
        assert!(PARSING_PROMPT.contains("group_range"));
    }

    #[test]
    fn structuring_prompt_appends_markdown() {
        let prompt = build_structuring_prompt("## Page 1\n18. 다음 글의 목적은?");
        assert!(prompt.starts_with(PARSING_PROMPT));
        assert!(prompt.contains("## Page 1"));
    }

    #[test]
    fn explanation_prompt_lists_questions_in_order() {
        let questions: Vec<Question> = [18u32, 20]
            .iter()
            .map(|&number| Question {
                number,
                question_type: QuestionType::Purpose,
                question_text: format!("문제 {number} 지시문"),
                passage: "Sample passage text for the prompt.".into(),
                choices: Vec::new(),
                points: 2,
                vocabulary_notes: Vec::new(),
                has_image: false,
                has_table: false,
                image_description: None,
                sub_questions: Vec::new(),
                group_range: None,
                explanation: None,
            })
            .collect();
        let refs: Vec<&Question> = questions.iter().collect();

        let prompt = build_explanation_prompt(&refs);
        let first = prompt.find("### 문제 18").expect("question 18 present");
        let second = prompt.find("### 문제 20").expect("question 20 present");
        assert!(first < second);
        assert!(prompt.contains("정답 근거"));
        assert!(prompt.contains("오답 분석"));
    }
}
