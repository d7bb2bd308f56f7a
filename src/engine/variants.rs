//! Booklet variant generation.
//!
//! The master variant keeps the pool order and prints every question's options in creation
//! order. Every other variant permutes the whole position sequence and, independently, each
//! question's options. The correct letter is taken from where the correct option lands, so a
//! baked key is right by construction.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::engine::answer_key::{
    AnswerKeyEntry, AnswerKeyMap, KeyMapError, OptionLetter, QuestionId, MAX_OPTIONS,
};
use crate::engine::optical::template::SheetTemplate;
use crate::engine::pool::{Question, QuestionPool};

pub(crate) const MIN_OPTIONS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum GenerationError {
    #[error("question pool is empty")]
    EmptyPool,
    #[error("subject {subject} has no questions")]
    EmptySubject { subject: String },
    #[error("question {question_id} has no correct option")]
    MissingAnswerKey { question_id: QuestionId },
    #[error("question {question_id} has {count} correct options; exactly one is required")]
    MultipleCorrectOptions { question_id: QuestionId, count: usize },
    #[error("question {question_id} has {count} options; at least {MIN_OPTIONS} are required")]
    TooFewOptions { question_id: QuestionId, count: usize },
    #[error("question {question_id} has {count} options; at most {MAX_OPTIONS} can be printed")]
    TooManyOptions { question_id: QuestionId, count: usize },
    #[error("question {question_id} has {count} options; the answer sheet prints {printed}")]
    WiderThanSheet { question_id: QuestionId, count: usize, printed: usize },
    #[error("booklet has {positions} questions; one answer sheet carries {capacity}")]
    ExceedsSheetCapacity { positions: usize, capacity: usize },
    #[error("invalid variant plan: {0}")]
    InvalidVariantPlan(String),
    #[error(transparent)]
    KeyMap(#[from] KeyMapError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VariantSpec {
    pub(crate) label: String,
    pub(crate) shuffle: bool,
}

impl VariantSpec {
    pub(crate) fn master(label: impl Into<String>) -> Self {
        Self { label: label.into(), shuffle: false }
    }

    pub(crate) fn shuffled(label: impl Into<String>) -> Self {
        Self { label: label.into(), shuffle: true }
    }
}

/// Exactly one master plus any number of shuffled variants, labels unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VariantPlan {
    specs: Vec<VariantSpec>,
}

impl VariantPlan {
    pub(crate) fn new(specs: Vec<VariantSpec>) -> Result<Self, GenerationError> {
        if specs.is_empty() {
            return Err(GenerationError::InvalidVariantPlan("no variants requested".to_string()));
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            let label = spec.label.trim();
            if label.is_empty() {
                return Err(GenerationError::InvalidVariantPlan("empty label".to_string()));
            }
            if !seen.insert(label.to_ascii_uppercase()) {
                return Err(GenerationError::InvalidVariantPlan(format!(
                    "duplicate label {label}"
                )));
            }
        }

        let masters = specs.iter().filter(|spec| !spec.shuffle).count();
        if masters != 1 {
            return Err(GenerationError::InvalidVariantPlan(format!(
                "expected exactly one unshuffled master variant, found {masters}"
            )));
        }

        Ok(Self { specs })
    }

    pub(crate) fn from_labels(labels: &[String], master: &str) -> Result<Self, GenerationError> {
        let specs = labels
            .iter()
            .map(|label| {
                if label.eq_ignore_ascii_case(master) {
                    VariantSpec::master(label.clone())
                } else {
                    VariantSpec::shuffled(label.clone())
                }
            })
            .collect();
        Self::new(specs)
    }

    pub(crate) fn specs(&self) -> &[VariantSpec] {
        &self.specs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BakedBooklet {
    pub(crate) label: String,
    pub(crate) is_master: bool,
    /// Seed of the permutation source; `None` for the master.
    pub(crate) seed: Option<u64>,
    pub(crate) key_map: AnswerKeyMap,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct VariantGenerator {
    seed: Option<u64>,
    sheet: Option<SheetTemplate>,
}

impl VariantGenerator {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        Self { seed, sheet: None }
    }

    /// Refuses pools the answer sheet cannot carry.
    pub(crate) fn with_sheet(mut self, sheet: SheetTemplate) -> Self {
        self.sheet = Some(sheet);
        self
    }

    /// Bakes every variant of `plan` for one generation unit.
    ///
    /// `unit_key` separates units that share a seed so that two schools do not receive the
    /// same shuffle. Nothing is returned unless every variant bakes.
    pub(crate) fn generate(
        &self,
        pool: &QuestionPool,
        plan: &VariantPlan,
        unit_key: &str,
    ) -> Result<Vec<BakedBooklet>, GenerationError> {
        validate_pool(pool)?;
        if let Some(sheet) = &self.sheet {
            check_sheet_fit(pool, sheet)?;
        }
        let master = pool.master_sequence();

        plan.specs()
            .iter()
            .map(|spec| {
                if !spec.shuffle {
                    let key_map = bake_variant(&master, false, &mut NoShuffle)?;
                    return Ok(BakedBooklet {
                        label: spec.label.clone(),
                        is_master: true,
                        seed: None,
                        key_map,
                    });
                }

                let seed = match self.seed {
                    Some(seed) => derive_seed(seed, unit_key, &spec.label),
                    None => rand::thread_rng().next_u64(),
                };
                let mut rng = StdRng::seed_from_u64(seed);
                let key_map = bake_variant(&master, true, &mut rng)?;
                Ok(BakedBooklet {
                    label: spec.label.clone(),
                    is_master: false,
                    seed: Some(seed),
                    key_map,
                })
            })
            .collect()
    }
}

/// Rejects pools that cannot produce a trustworthy key before anything is baked.
pub(crate) fn validate_pool(pool: &QuestionPool) -> Result<(), GenerationError> {
    if pool.subjects().is_empty() || pool.is_empty() {
        return Err(GenerationError::EmptyPool);
    }

    for subject in pool.subjects() {
        if subject.questions.is_empty() {
            return Err(GenerationError::EmptySubject { subject: subject.subject.clone() });
        }
        for question in &subject.questions {
            validate_question(question)?;
        }
    }
    Ok(())
}

/// Every row must fit the printed bubbles and every position must land on the one sheet.
pub(crate) fn check_sheet_fit(
    pool: &QuestionPool,
    sheet: &SheetTemplate,
) -> Result<(), GenerationError> {
    let printed = sheet.option_count();
    if let Some(question) =
        pool.master_sequence().into_iter().find(|question| question.options.len() > printed)
    {
        return Err(GenerationError::WiderThanSheet {
            question_id: question.id,
            count: question.options.len(),
            printed,
        });
    }

    let positions = pool.question_count();
    if positions > sheet.capacity() {
        return Err(GenerationError::ExceedsSheetCapacity {
            positions,
            capacity: sheet.capacity(),
        });
    }
    Ok(())
}

fn validate_question(question: &Question) -> Result<(), GenerationError> {
    let count = question.options.len();
    if count < MIN_OPTIONS {
        return Err(GenerationError::TooFewOptions { question_id: question.id, count });
    }
    if count > MAX_OPTIONS {
        return Err(GenerationError::TooManyOptions { question_id: question.id, count });
    }

    match question.correct_options().count() {
        0 => Err(GenerationError::MissingAnswerKey { question_id: question.id }),
        1 => Ok(()),
        count => Err(GenerationError::MultipleCorrectOptions { question_id: question.id, count }),
    }
}

/// Bakes one variant from the master sequence. The permutation source is injected so a seeded
/// generator reproduces the same booklet.
pub(crate) fn bake_variant<R: Rng + ?Sized>(
    master: &[&Question],
    shuffle: bool,
    rng: &mut R,
) -> Result<AnswerKeyMap, GenerationError> {
    let mut sequence: Vec<&Question> = master.to_vec();
    if shuffle {
        sequence.shuffle(rng);
    }

    let mut entries = Vec::with_capacity(sequence.len());
    for (index, question) in sequence.into_iter().enumerate() {
        let mut options = question.options_by_id();
        if shuffle {
            options.shuffle(rng);
        }

        let correct = options
            .iter()
            .position(|option| option.is_correct)
            .and_then(OptionLetter::from_index)
            .ok_or(GenerationError::MissingAnswerKey { question_id: question.id })?;

        entries.push(AnswerKeyEntry {
            position: index as u32 + 1,
            question_id: question.id,
            subject: question.subject.clone(),
            correct,
            option_order: options.iter().map(|option| option.id).collect(),
            legacy: false,
        });
    }

    Ok(AnswerKeyMap::new(entries)?)
}

fn derive_seed(seed: u64, unit_key: &str, label: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(unit_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(label.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Stand-in generator for the master; never consulted because nothing is shuffled.
struct NoShuffle;

impl RngCore for NoShuffle {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        dest.fill(0);
        Ok(())
    }
}
