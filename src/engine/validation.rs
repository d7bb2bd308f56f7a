//! Content review of a section before approval.

use serde::Serialize;

use crate::db::types::QuestionDifficulty;
use crate::engine::pool::Question;

pub(crate) const NEEDED_QUESTIONS: usize = 25;
const MIN_SECTION_OPTIONS: usize = 3;
const MIN_TEXT_CHARS: usize = 5;
const DUPLICATE_RATIO: f64 = 0.95;
const SIMILAR_RATIO: f64 = 0.75;
const MAX_HARD_PERCENT: f64 = 30.0;
const MIN_EASY_PERCENT: f64 = 20.0;
const PREVIEW_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct DifficultyBreakdown {
    pub(crate) easy: usize,
    pub(crate) medium: usize,
    pub(crate) hard: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SectionStats {
    pub(crate) current: usize,
    pub(crate) needed_max: usize,
    pub(crate) difficulty_breakdown: DifficultyBreakdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SectionReport {
    pub(crate) is_valid: bool,
    pub(crate) errors: Vec<String>,
    pub(crate) warnings: Vec<String>,
    pub(crate) stats: SectionStats,
}

/// Reviews `questions` in section order. Numbers in messages are 1-based section positions.
pub(crate) fn validate_section(questions: &[Question]) -> SectionReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (index, question) in questions.iter().enumerate() {
        let number = index + 1;
        let preview = preview(&question.text);
        if question.options.len() < MIN_SECTION_OPTIONS {
            errors.push(format!(
                "question #{number} ({preview}) has fewer than {MIN_SECTION_OPTIONS} options"
            ));
        }
        match question.correct_options().count() {
            0 => errors.push(format!("question #{number} ({preview}) has no correct option")),
            1 => {}
            count => errors.push(format!(
                "question #{number} ({preview}) has {count} correct options"
            )),
        }
        if question.text.trim().chars().count() < MIN_TEXT_CHARS {
            warnings.push(format!("question #{number} looks too short or empty"));
        }
    }

    let texts: Vec<Vec<char>> = questions.iter().map(|q| q.text.chars().collect()).collect();
    for first in 0..texts.len() {
        for second in first + 1..texts.len() {
            let ratio = similarity_ratio(&texts[first], &texts[second]);
            if ratio > DUPLICATE_RATIO {
                errors.push(format!(
                    "duplicate: question #{} matches #{}",
                    first + 1,
                    second + 1
                ));
            } else if ratio > SIMILAR_RATIO {
                warnings.push(format!(
                    "questions #{} and #{} are {}% similar",
                    first + 1,
                    second + 1,
                    (ratio * 100.0) as u32
                ));
            }
        }
    }

    let mut breakdown = DifficultyBreakdown::default();
    for question in questions {
        match question.difficulty {
            QuestionDifficulty::Easy => breakdown.easy += 1,
            QuestionDifficulty::Medium => breakdown.medium += 1,
            QuestionDifficulty::Hard => breakdown.hard += 1,
        }
    }

    let current = questions.len();
    if current > 0 {
        let total = current as f64;
        let hard = breakdown.hard as f64 * 100.0 / total;
        let easy = breakdown.easy as f64 * 100.0 / total;
        if hard > MAX_HARD_PERCENT {
            warnings.push(format!("too many hard questions ({}%)", hard as u32));
        }
        if easy < MIN_EASY_PERCENT {
            warnings.push(format!("too few easy questions ({}%)", easy as u32));
        }
    }
    if current < NEEDED_QUESTIONS {
        warnings.push(format!("section is incomplete: {current} of {NEEDED_QUESTIONS}"));
    }

    SectionReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        stats: SectionStats {
            current,
            needed_max: NEEDED_QUESTIONS,
            difficulty_breakdown: breakdown,
        },
    }
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

/// Ratcliff/Obershelp similarity: twice the matched characters over the total length.
pub(crate) fn similarity_ratio(left: &[char], right: &[char]) -> f64 {
    let total = left.len() + right.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(left, right) as f64 / total as f64
}

fn matched_chars(left: &[char], right: &[char]) -> usize {
    let mut pending = vec![(0, left.len(), 0, right.len())];
    let mut matched = 0;
    while let Some((left_lo, left_hi, right_lo, right_hi)) = pending.pop() {
        let (start_left, start_right, len) =
            longest_match(&left[left_lo..left_hi], &right[right_lo..right_hi]);
        if len == 0 {
            continue;
        }
        matched += len;
        let (start_left, start_right) = (left_lo + start_left, right_lo + start_right);
        pending.push((left_lo, start_left, right_lo, start_right));
        pending.push((start_left + len, left_hi, start_right + len, right_hi));
    }
    matched
}

/// Longest common block, earliest in `left` then in `right` on ties.
fn longest_match(left: &[char], right: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut previous = vec![0usize; right.len() + 1];
    for (i, left_char) in left.iter().enumerate() {
        let mut current = vec![0usize; right.len() + 1];
        for (j, right_char) in right.iter().enumerate() {
            if left_char == right_char {
                let len = previous[j] + 1;
                current[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        previous = current;
    }
    best
}
