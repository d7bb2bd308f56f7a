use serde::{Deserialize, Serialize};

use crate::db::types::QuestionDifficulty;
use crate::engine::answer_key::{OptionId, QuestionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AnswerOption {
    pub(crate) id: OptionId,
    pub(crate) text: String,
    pub(crate) is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Question {
    pub(crate) id: QuestionId,
    pub(crate) subject: String,
    pub(crate) text: String,
    pub(crate) difficulty: QuestionDifficulty,
    pub(crate) options: Vec<AnswerOption>,
}

impl Question {
    /// Options in creation order, which is the order printed on the master booklet.
    pub(crate) fn options_by_id(&self) -> Vec<&AnswerOption> {
        let mut options: Vec<&AnswerOption> = self.options.iter().collect();
        options.sort_by_key(|option| option.id);
        options
    }

    pub(crate) fn correct_options(&self) -> impl Iterator<Item = &AnswerOption> {
        self.options.iter().filter(|option| option.is_correct)
    }
}

/// One subject's contiguous run of questions, already in expert order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SubjectPool {
    pub(crate) subject: String,
    pub(crate) sort_order: i32,
    pub(crate) questions: Vec<Question>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct QuestionPool {
    subjects: Vec<SubjectPool>,
}

impl QuestionPool {
    pub(crate) fn new(mut subjects: Vec<SubjectPool>) -> Self {
        subjects.sort_by(|left, right| {
            left.sort_order.cmp(&right.sort_order).then_with(|| left.subject.cmp(&right.subject))
        });
        Self { subjects }
    }

    pub(crate) fn subjects(&self) -> &[SubjectPool] {
        &self.subjects
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subjects.iter().all(|subject| subject.questions.is_empty())
    }

    pub(crate) fn question_count(&self) -> usize {
        self.subjects.iter().map(|subject| subject.questions.len()).sum()
    }

    /// The master position sequence: subject runs concatenated in subject order.
    pub(crate) fn master_sequence(&self) -> Vec<&Question> {
        self.subjects.iter().flat_map(|subject| subject.questions.iter()).collect()
    }
}
