//! Printable view of a booklet, rendered from its stored key map.
//!
//! Option letters always come from the entry's `option_order`, the same order recognition and
//! grading read, so a printed sheet cannot drift from its key.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::PgPool;

use crate::db::models::Booklet;
use crate::engine::answer_key::{AnswerKeyMap, KeyMapError, OptionLetter, QuestionId};
use crate::engine::pool::Question;
use crate::services::answer_keys;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct PreviewOption {
    pub(crate) letter: char,
    pub(crate) option_id: i64,
    pub(crate) text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct PreviewQuestion {
    pub(crate) position: u32,
    pub(crate) question_id: QuestionId,
    pub(crate) text: String,
    pub(crate) options: Vec<PreviewOption>,
    /// The stored entry had no printed order; options follow the question's own order.
    pub(crate) legacy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct PreviewSection {
    pub(crate) subject: String,
    pub(crate) first_position: u32,
    pub(crate) questions: Vec<PreviewQuestion>,
}

pub(crate) async fn load_preview(pool: &PgPool, booklet: &Booklet) -> Result<Vec<PreviewSection>> {
    let key_map = answer_keys::load_key_map(pool, booklet).await?;
    let ids: Vec<QuestionId> = key_map.question_ids().into_iter().collect();
    let questions = answer_keys::load_questions(pool, &ids).await?;

    build_preview(&key_map, &questions)
        .with_context(|| format!("Booklet {} references missing questions", booklet.id))
}

pub(crate) fn build_preview(
    key_map: &AnswerKeyMap,
    questions: &HashMap<QuestionId, Question>,
) -> Result<Vec<PreviewSection>, KeyMapError> {
    let mut sections: Vec<PreviewSection> = Vec::new();

    for entry in key_map.entries() {
        let question = questions
            .get(&entry.question_id)
            .ok_or(KeyMapError::UnknownQuestion { question_id: entry.question_id })?;

        let mut options = Vec::with_capacity(entry.option_order.len());
        for (index, option_id) in entry.option_order.iter().enumerate() {
            let option = question.options.iter().find(|option| option.id == *option_id);
            let letter = OptionLetter::from_index(index);
            let (Some(option), Some(letter)) = (option, letter) else {
                return Err(KeyMapError::OptionMismatch {
                    position: entry.position,
                    key: entry.correct,
                    options: question.options.len(),
                });
            };
            options.push(PreviewOption {
                letter: letter.as_char(),
                option_id: option.id,
                text: option.text.clone(),
            });
        }

        let preview = PreviewQuestion {
            position: entry.position,
            question_id: question.id,
            text: question.text.clone(),
            options,
            legacy: entry.legacy,
        };

        match sections.last_mut() {
            Some(section) if section.subject == entry.subject => section.questions.push(preview),
            _ => sections.push(PreviewSection {
                subject: entry.subject.clone(),
                first_position: entry.position,
                questions: vec![preview],
            }),
        }
    }

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::types::QuestionDifficulty;
    use crate::engine::answer_key::PersistedKeyMap;
    use crate::engine::pool::AnswerOption;

    fn question(id: i64, subject: &str, option_ids: &[i64], correct: i64) -> Question {
        Question {
            id,
            subject: subject.to_string(),
            text: format!("question {id}"),
            difficulty: QuestionDifficulty::Easy,
            options: option_ids
                .iter()
                .map(|option_id| AnswerOption {
                    id: *option_id,
                    text: format!("option {option_id}"),
                    is_correct: *option_id == correct,
                })
                .collect(),
        }
    }

    fn lookup() -> HashMap<QuestionId, Question> {
        HashMap::from([
            (1, question(1, "MATH", &[11, 12, 13, 14], 11)),
            (2, question(2, "MATH", &[21, 22, 23, 24], 24)),
            (3, question(3, "RUS", &[33, 31, 32], 32)),
        ])
    }

    #[test]
    fn letters_follow_stored_order_and_subjects_group() {
        let stored = json!({
            "1": {"id": 1, "key": "B", "choices": [12, 11, 13, 14], "subject": "MATH"},
            "2": {"id": 2, "key": "A", "choices": [24, 23, 22, 21], "subject": "MATH"},
            "3": 3
        });
        let map = PersistedKeyMap::from_json(&stored)
            .and_then(|persisted| persisted.normalize(&lookup()))
            .expect("key map");

        let sections = build_preview(&map, &lookup()).expect("preview");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].subject, "MATH");
        assert_eq!(sections[1].first_position, 3);

        let first = &sections[0].questions[0];
        let printed: Vec<(char, i64)> =
            first.options.iter().map(|option| (option.letter, option.option_id)).collect();
        assert_eq!(printed, vec![('A', 12), ('B', 11), ('C', 13), ('D', 14)]);
        assert!(!first.legacy);

        let legacy = &sections[1].questions[0];
        assert!(legacy.legacy);
        let order: Vec<i64> = legacy.options.iter().map(|option| option.option_id).collect();
        assert_eq!(order, vec![31, 32, 33]);
    }

    #[test]
    fn printed_order_must_match_the_question() {
        let stored = json!({"1": {"id": 1, "key": "A", "choices": [11, 99], "subject": "MATH"}});
        let map = PersistedKeyMap::from_json(&stored)
            .and_then(|persisted| persisted.normalize(&lookup()))
            .expect("key map");

        assert!(matches!(
            build_preview(&map, &lookup()),
            Err(KeyMapError::OptionMismatch { position: 1, .. })
        ));
        assert_eq!(
            build_preview(&map, &HashMap::new()),
            Err(KeyMapError::UnknownQuestion { question_id: 1 })
        );
    }
}
