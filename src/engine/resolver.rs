use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::answer_key::{AnswerKeyMap, OptionLetter};

/// Selected letter per booklet position. A position that is absent was left blank or could
/// not be read; both grade as no answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct RawAnswers {
    selections: BTreeMap<u32, OptionLetter>,
}

impl RawAnswers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&mut self, position: u32, selected: Option<OptionLetter>) {
        match selected {
            Some(letter) => {
                self.selections.insert(position, letter);
            }
            None => {
                self.selections.remove(&position);
            }
        }
    }

    pub(crate) fn selected(&self, position: u32) -> Option<OptionLetter> {
        self.selections.get(&position).copied()
    }

    pub(crate) fn answered(&self) -> usize {
        self.selections.len()
    }
}

impl FromIterator<(u32, Option<OptionLetter>)> for RawAnswers {
    fn from_iter<T: IntoIterator<Item = (u32, Option<OptionLetter>)>>(iter: T) -> Self {
        let mut answers = Self::new();
        for (position, selected) in iter {
            answers.set(position, selected);
        }
        answers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PositionOutcome {
    pub(crate) selected: Option<OptionLetter>,
    pub(crate) correct: OptionLetter,
    pub(crate) is_match: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SubjectTally {
    pub(crate) correct: u32,
    pub(crate) total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GradedResult {
    pub(crate) booklet_id: String,
    pub(crate) student_ref: String,
    pub(crate) score: u32,
    pub(crate) max_score: u32,
    pub(crate) percentage: f64,
    pub(crate) per_position: BTreeMap<u32, PositionOutcome>,
    pub(crate) per_subject: BTreeMap<String, SubjectTally>,
    /// Set when the answers came from an unrectified optical scan.
    pub(crate) low_confidence: bool,
}

impl GradedResult {
    pub(crate) fn with_low_confidence(mut self, low_confidence: bool) -> Self {
        self.low_confidence = low_confidence;
        self
    }
}

/// Scores `answers` against `key`. Every map entry counts toward `max_score`, answered or not,
/// and positions outside the map are ignored.
pub(crate) fn resolve(
    booklet_id: &str,
    student_ref: &str,
    key: &AnswerKeyMap,
    answers: &RawAnswers,
) -> GradedResult {
    let mut per_position = BTreeMap::new();
    let mut per_subject: BTreeMap<String, SubjectTally> = BTreeMap::new();
    let mut score = 0u32;

    for entry in key.entries() {
        let selected = answers.selected(entry.position);
        let is_match = selected == Some(entry.correct);
        if is_match {
            score += 1;
        }

        let tally = per_subject.entry(entry.subject.clone()).or_default();
        tally.total += 1;
        if is_match {
            tally.correct += 1;
        }

        per_position
            .insert(entry.position, PositionOutcome { selected, correct: entry.correct, is_match });
    }

    let max_score = key.len() as u32;
    GradedResult {
        booklet_id: booklet_id.to_string(),
        student_ref: student_ref.to_string(),
        score,
        max_score,
        percentage: percentage(score, max_score),
        per_position,
        per_subject,
        low_confidence: false,
    }
}

/// `score / max * 100` rounded to one decimal; zero when there is nothing to score.
pub(crate) fn percentage(score: u32, max_score: u32) -> f64 {
    if max_score == 0 {
        return 0.0;
    }
    (f64::from(score) * 1000.0 / f64::from(max_score)).round() / 10.0
}
