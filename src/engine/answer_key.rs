//! The answer-key map baked into every booklet.
//!
//! An entry fixes, for one printed position, which question sits there, the exact order its
//! options are printed in, and the letter of the correct option in that order. Printing,
//! optical recognition and grading all read option order from here and nowhere else.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::engine::pool::Question;

pub(crate) type QuestionId = i64;
pub(crate) type OptionId = i64;

pub(crate) const MAX_OPTIONS: usize = 6;
const LETTERS: [char; MAX_OPTIONS] = ['A', 'B', 'C', 'D', 'E', 'F'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct OptionLetter(u8);

impl OptionLetter {
    pub(crate) fn from_index(index: usize) -> Option<Self> {
        (index < MAX_OPTIONS).then_some(Self(index as u8))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn as_char(self) -> char {
        LETTERS[self.index()]
    }

    /// Strict parse of a single Latin letter, case-insensitive.
    pub(crate) fn parse(value: &str) -> Option<Self> {
        let mut chars = value.trim().chars();
        let first = chars.next()?.to_ascii_uppercase();
        if chars.next().is_some() {
            return None;
        }
        LETTERS.iter().position(|letter| *letter == first).and_then(Self::from_index)
    }
}

impl fmt::Display for OptionLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl Serialize for OptionLetter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OptionLetter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid option letter: {raw:?}")))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum KeyMapError {
    #[error("answer key is not valid json: {0}")]
    InvalidJson(String),
    #[error("invalid answer key position: {0:?}")]
    InvalidPosition(String),
    #[error("position {position} appears more than once")]
    DuplicatePosition { position: u32 },
    #[error("question {question_id} referenced by the answer key no longer exists")]
    UnknownQuestion { question_id: QuestionId },
    #[error("question {question_id} has no correct option")]
    NoCorrectOption { question_id: QuestionId },
    #[error("position {position}: key {key} is outside the {options} printed options")]
    OptionMismatch { position: u32, key: OptionLetter, options: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AnswerKeyEntry {
    pub(crate) position: u32,
    pub(crate) question_id: QuestionId,
    pub(crate) subject: String,
    pub(crate) correct: OptionLetter,
    pub(crate) option_order: Vec<OptionId>,
    /// Restored from a bare question id; option order is the question's own order.
    #[serde(default)]
    pub(crate) legacy: bool,
}

impl AnswerKeyEntry {
    pub(crate) fn option_at(&self, letter: OptionLetter) -> Option<OptionId> {
        self.option_order.get(letter.index()).copied()
    }

    pub(crate) fn correct_option(&self) -> Option<OptionId> {
        self.option_at(self.correct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) struct AnswerKeyMap {
    entries: Vec<AnswerKeyEntry>,
}

/// A run of consecutive positions that belong to the same subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SubjectRun {
    pub(crate) subject: String,
    pub(crate) first_position: u32,
    pub(crate) len: u32,
}

impl AnswerKeyMap {
    pub(crate) fn new(mut entries: Vec<AnswerKeyEntry>) -> Result<Self, KeyMapError> {
        entries.sort_by_key(|entry| entry.position);
        for pair in entries.windows(2) {
            if pair[0].position == pair[1].position {
                return Err(KeyMapError::DuplicatePosition { position: pair[0].position });
            }
        }
        for entry in &entries {
            if entry.position == 0 {
                return Err(KeyMapError::InvalidPosition("0".to_string()));
            }
            if entry.correct.index() >= entry.option_order.len() {
                return Err(KeyMapError::OptionMismatch {
                    position: entry.position,
                    key: entry.correct,
                    options: entry.option_order.len(),
                });
            }
        }
        Ok(Self { entries })
    }

    pub(crate) fn entries(&self) -> &[AnswerKeyEntry] {
        &self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get(&self, position: u32) -> Option<&AnswerKeyEntry> {
        self.entries
            .binary_search_by_key(&position, |entry| entry.position)
            .ok()
            .map(|index| &self.entries[index])
    }

    pub(crate) fn question_ids(&self) -> BTreeSet<QuestionId> {
        self.entries.iter().map(|entry| entry.question_id).collect()
    }

    /// Widest printed row; sheets draw this many bubbles per position.
    pub(crate) fn max_option_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.option_order.len()).max().unwrap_or(0)
    }

    pub(crate) fn subject_runs(&self) -> Vec<SubjectRun> {
        let mut runs: Vec<SubjectRun> = Vec::new();
        for entry in &self.entries {
            match runs.last_mut() {
                Some(run)
                    if run.subject == entry.subject
                        && run.first_position + run.len == entry.position =>
                {
                    run.len += 1;
                }
                _ => runs.push(SubjectRun {
                    subject: entry.subject.clone(),
                    first_position: entry.position,
                    len: 1,
                }),
            }
        }
        runs
    }
}

/// A question id as found in older maps, either a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum LegacyQuestionRef {
    Number(QuestionId),
    Text(String),
}

impl LegacyQuestionRef {
    fn question_id(&self) -> Option<QuestionId> {
        match self {
            Self::Number(id) => Some(*id),
            Self::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StructuredEntry {
    pub(crate) id: QuestionId,
    pub(crate) key: OptionLetter,
    pub(crate) choices: Vec<OptionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum PersistedEntry {
    Structured(StructuredEntry),
    Legacy(LegacyQuestionRef),
}

/// Stored form of a map: stringified position to entry. Readers accept both the legacy bare
/// question id and the structured record; [`PersistedKeyMap::from_key_map`] only writes the
/// structured record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct PersistedKeyMap(BTreeMap<String, PersistedEntry>);

pub(crate) trait QuestionLookup {
    fn question(&self, id: QuestionId) -> Option<&Question>;
}

impl QuestionLookup for HashMap<QuestionId, Question> {
    fn question(&self, id: QuestionId) -> Option<&Question> {
        self.get(&id)
    }
}

impl PersistedKeyMap {
    pub(crate) fn from_json(value: &serde_json::Value) -> Result<Self, KeyMapError> {
        serde_json::from_value(value.clone())
            .map_err(|err| KeyMapError::InvalidJson(err.to_string()))
    }

    pub(crate) fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub(crate) fn from_key_map(map: &AnswerKeyMap) -> Self {
        let entries = map
            .entries()
            .iter()
            .map(|entry| {
                (
                    entry.position.to_string(),
                    PersistedEntry::Structured(StructuredEntry {
                        id: entry.question_id,
                        key: entry.correct,
                        choices: entry.option_order.clone(),
                        subject: Some(entry.subject.clone()),
                    }),
                )
            })
            .collect();
        Self(entries)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Question ids that must be loaded before [`PersistedKeyMap::normalize`] can succeed.
    pub(crate) fn questions_to_lookup(&self) -> Vec<QuestionId> {
        let ids: BTreeSet<QuestionId> = self
            .0
            .values()
            .filter_map(|entry| match entry {
                PersistedEntry::Structured(StructuredEntry { subject: Some(_), .. }) => None,
                PersistedEntry::Structured(structured) => Some(structured.id),
                PersistedEntry::Legacy(reference) => reference.question_id(),
            })
            .collect();
        ids.into_iter().collect()
    }

    pub(crate) fn normalize(
        &self,
        lookup: &impl QuestionLookup,
    ) -> Result<AnswerKeyMap, KeyMapError> {
        let mut entries = Vec::with_capacity(self.0.len());
        for (raw_position, persisted) in &self.0 {
            let position: u32 = raw_position
                .trim()
                .parse()
                .map_err(|_| KeyMapError::InvalidPosition(raw_position.clone()))?;

            let entry = match persisted {
                PersistedEntry::Structured(structured) => {
                    let subject = match &structured.subject {
                        Some(subject) => subject.clone(),
                        None => lookup
                            .question(structured.id)
                            .map(|question| question.subject.clone())
                            .ok_or(KeyMapError::UnknownQuestion { question_id: structured.id })?,
                    };
                    AnswerKeyEntry {
                        position,
                        question_id: structured.id,
                        subject,
                        correct: structured.key,
                        option_order: structured.choices.clone(),
                        legacy: false,
                    }
                }
                PersistedEntry::Legacy(reference) => {
                    let question_id = reference
                        .question_id()
                        .ok_or_else(|| KeyMapError::InvalidJson(format!("{reference:?}")))?;
                    let question = lookup
                        .question(question_id)
                        .ok_or(KeyMapError::UnknownQuestion { question_id })?;
                    legacy_entry(position, question)?
                }
            };
            entries.push(entry);
        }
        AnswerKeyMap::new(entries)
    }
}

fn legacy_entry(position: u32, question: &Question) -> Result<AnswerKeyEntry, KeyMapError> {
    let options = question.options_by_id();
    let correct = options
        .iter()
        .position(|option| option.is_correct)
        .and_then(OptionLetter::from_index)
        .ok_or(KeyMapError::NoCorrectOption { question_id: question.id })?;

    Ok(AnswerKeyEntry {
        position,
        question_id: question.id,
        subject: question.subject.clone(),
        correct,
        option_order: options.iter().map(|option| option.id).collect(),
        legacy: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::QuestionDifficulty;
    use crate::engine::pool::AnswerOption;
    use serde_json::json;

    fn lookup() -> HashMap<QuestionId, Question> {
        let question = Question {
            id: 10,
            subject: "MATH".to_string(),
            text: "2 + 2".to_string(),
            difficulty: QuestionDifficulty::Easy,
            options: vec![
                AnswerOption { id: 103, text: "5".into(), is_correct: false },
                AnswerOption { id: 101, text: "3".into(), is_correct: false },
                AnswerOption { id: 102, text: "4".into(), is_correct: true },
            ],
        };
        HashMap::from([(10, question)])
    }

    #[test]
    fn option_letter_parses_and_displays() {
        assert_eq!(OptionLetter::parse("c").map(OptionLetter::index), Some(2));
        assert_eq!(OptionLetter::parse(" F ").map(|l| l.as_char()), Some('F'));
        assert_eq!(OptionLetter::parse("G"), None);
        assert_eq!(OptionLetter::parse("AB"), None);
        assert_eq!(OptionLetter::from_index(6), None);
    }

    #[test]
    fn reads_structured_and_legacy_entries() {
        let raw = json!({
            "1": {"id": 7, "key": "B", "choices": [72, 71, 73, 74], "subject": "RUS"},
            "2": 10,
            "3": "10"
        });
        let persisted = PersistedKeyMap::from_json(&raw).expect("parse");
        assert_eq!(persisted.questions_to_lookup(), vec![10]);

        let map = persisted.normalize(&lookup()).expect("normalize");
        assert_eq!(map.len(), 3);

        let first = map.get(1).expect("position 1");
        assert_eq!(first.correct.as_char(), 'B');
        assert_eq!(first.correct_option(), Some(71));
        assert!(!first.legacy);

        let legacy = map.get(2).expect("position 2");
        assert!(legacy.legacy);
        assert_eq!(legacy.option_order, vec![101, 102, 103]);
        assert_eq!(legacy.correct.as_char(), 'B');
        assert_eq!(legacy.subject, "MATH");
    }

    #[test]
    fn structured_without_subject_needs_lookup() {
        let raw = json!({"1": {"id": 10, "key": "A", "choices": [102, 101, 103]}});
        let persisted = PersistedKeyMap::from_json(&raw).expect("parse");
        assert_eq!(persisted.questions_to_lookup(), vec![10]);

        let map = persisted.normalize(&lookup()).expect("normalize");
        assert_eq!(map.get(1).map(|entry| entry.subject.as_str()), Some("MATH"));

        let missing = persisted.normalize(&HashMap::new()).unwrap_err();
        assert_eq!(missing, KeyMapError::UnknownQuestion { question_id: 10 });
    }

    #[test]
    fn writer_emits_structured_form_only() {
        let raw = json!({"1": 10});
        let map = PersistedKeyMap::from_json(&raw).unwrap().normalize(&lookup()).unwrap();

        let written = PersistedKeyMap::from_key_map(&map).to_json().unwrap();
        assert_eq!(
            written,
            json!({"1": {"id": 10, "key": "B", "choices": [101, 102, 103], "subject": "MATH"}})
        );
    }

    #[test]
    fn rejects_unknown_key_letter_and_bad_positions() {
        let unknown = json!({"1": {"id": 7, "key": "?", "choices": [1, 2]}});
        assert!(matches!(
            PersistedKeyMap::from_json(&unknown),
            Err(KeyMapError::InvalidJson(_))
        ));

        let out_of_range = json!({"1": {"id": 7, "key": "D", "choices": [1, 2], "subject": "X"}});
        let err = PersistedKeyMap::from_json(&out_of_range).unwrap().normalize(&lookup());
        assert!(matches!(err, Err(KeyMapError::OptionMismatch { position: 1, .. })));

        let bad_position = json!({"first": {"id": 7, "key": "A", "choices": [1, 2], "subject": "X"}});
        let err = PersistedKeyMap::from_json(&bad_position).unwrap().normalize(&lookup());
        assert_eq!(err, Err(KeyMapError::InvalidPosition("first".to_string())));
    }

    #[test]
    fn subject_runs_group_consecutive_positions() {
        let entry = |position: u32, subject: &str| AnswerKeyEntry {
            position,
            question_id: position as i64,
            subject: subject.to_string(),
            correct: OptionLetter::from_index(0).unwrap(),
            option_order: vec![1, 2, 3, 4],
            legacy: false,
        };
        let map = AnswerKeyMap::new(vec![
            entry(3, "RUS"),
            entry(1, "MATH"),
            entry(2, "MATH"),
            entry(4, "MATH"),
        ])
        .unwrap();

        let runs = map.subject_runs();
        assert_eq!(runs.len(), 3);
        assert_eq!((runs[0].subject.as_str(), runs[0].first_position, runs[0].len), ("MATH", 1, 2));
        assert_eq!((runs[1].subject.as_str(), runs[1].first_position, runs[1].len), ("RUS", 3, 1));
        assert_eq!((runs[2].subject.as_str(), runs[2].first_position, runs[2].len), ("MATH", 4, 1));
        assert_eq!(map.max_option_count(), 4);
    }
}
