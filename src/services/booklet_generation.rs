use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::engine::answer_key::PersistedKeyMap;
use crate::engine::optical::template::SheetTemplate;
use crate::engine::pool::{Question, QuestionPool, SubjectPool};
use crate::engine::variants::{BakedBooklet, GenerationError, VariantGenerator, VariantPlan};
use crate::repositories;
use crate::repositories::booklets::{UnitKey, UpsertBooklet};
use crate::repositories::sections::ApprovedSection;
use crate::services::answer_keys::assemble_questions;

#[derive(Debug, Clone)]
pub(crate) struct GenerationRequest {
    pub(crate) round_id: String,
    pub(crate) day: i32,
    pub(crate) grade_level: Option<i32>,
    pub(crate) school_ids: Option<Vec<String>>,
    /// `None` falls back to the configured labels.
    pub(crate) plan: Option<VariantPlan>,
    pub(crate) seed: Option<u64>,
}

#[derive(Debug, Error)]
pub(crate) enum GenerationRequestError {
    #[error("exam round not found")]
    RoundNotFound,
    #[error("no approved sections for day {day}")]
    NoApprovedSections { day: i32 },
    #[error("no schools matched the request")]
    NoSchools,
    #[error(transparent)]
    InvalidPlan(GenerationError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Why one (school, grade) unit produced nothing.
#[derive(Debug, Error)]
pub(crate) enum UnitError {
    #[error("grade {grade_level} has no approved sections for this day")]
    NoApprovedSections { grade_level: i32 },
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("variant {variant} is already published and cannot be regenerated")]
    Published { variant: String },
    #[error("failed to store booklets: {0:#}")]
    Storage(anyhow::Error),
}

impl UnitError {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::NoApprovedSections { .. } => "no_approved_sections",
            Self::Generation(_) => "generation",
            Self::Published { .. } => "published",
            Self::Storage(_) => "storage",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GeneratedBooklet {
    pub(crate) id: String,
    pub(crate) variant: String,
    pub(crate) is_master: bool,
    pub(crate) positions: usize,
}

#[derive(Debug)]
pub(crate) struct UnitOutcome {
    pub(crate) school_id: String,
    pub(crate) grade_level: i32,
    pub(crate) result: Result<Vec<GeneratedBooklet>, UnitError>,
}

/// Everything a unit task needs, shared by every unit of the same grade.
struct UnitContext {
    db: PgPool,
    round_id: String,
    round_name: String,
    day: i32,
    plan: VariantPlan,
    generator: VariantGenerator,
}

/// Bakes every (school, grade) unit of a round day. Units run concurrently, bounded by the
/// configured generation concurrency, and each one is stored in its own transaction.
pub(crate) async fn generate_round(
    state: &AppState,
    request: GenerationRequest,
) -> Result<Vec<UnitOutcome>, GenerationRequestError> {
    let settings = state.settings().generation();
    let plan = match request.plan {
        Some(plan) => plan,
        None => VariantPlan::from_labels(&settings.variant_labels, &settings.master_variant)
            .map_err(GenerationRequestError::InvalidPlan)?,
    };

    let round = repositories::rounds::find_by_id(state.db(), &request.round_id)
        .await
        .context("Failed to fetch exam round")?
        .ok_or(GenerationRequestError::RoundNotFound)?;

    let sections = repositories::sections::list_approved(
        state.db(),
        &round.id,
        request.day,
        request.grade_level,
    )
    .await
    .context("Failed to list approved sections")?;
    if sections.is_empty() && request.grade_level.is_none() {
        return Err(GenerationRequestError::NoApprovedSections { day: request.day });
    }

    let schools = repositories::schools::list(state.db(), request.school_ids.as_deref())
        .await
        .context("Failed to list schools")?;
    if schools.is_empty() {
        return Err(GenerationRequestError::NoSchools);
    }

    let mut pools = BTreeMap::new();
    for (grade_level, grade_sections) in group_by_grade(sections) {
        pools.insert(grade_level, Arc::new(load_pool(state.db(), grade_sections).await?));
    }
    let grades: BTreeSet<i32> = match request.grade_level {
        Some(grade_level) => BTreeSet::from([grade_level]),
        None => pools.keys().copied().collect(),
    };

    let context = Arc::new(UnitContext {
        db: state.db().clone(),
        round_id: round.id,
        round_name: round.name,
        day: request.day,
        plan,
        generator: VariantGenerator::new(request.seed.or(settings.seed))
            .with_sheet(SheetTemplate::new(state.settings().recognition().option_count)),
    });
    let permits = Arc::new(Semaphore::new(settings.concurrency));

    tracing::info!(
        round_id = %context.round_id,
        day = context.day,
        grades = grades.len(),
        schools = schools.len(),
        "Generating booklets"
    );

    let mut handles = Vec::new();
    for grade_level in &grades {
        for school in &schools {
            let grade_level = *grade_level;
            let school_id = school.id.clone();
            let pool = pools.get(&grade_level).cloned();
            let context = context.clone();
            let permits = permits.clone();

            handles.push(tokio::spawn(async move {
                let result = match pool {
                    Some(pool) => match permits.acquire_owned().await {
                        Ok(_permit) => {
                            generate_unit(&context, &school_id, grade_level, &pool).await
                        }
                        Err(err) => Err(UnitError::Storage(err.into())),
                    },
                    None => Err(UnitError::NoApprovedSections { grade_level }),
                };
                record_unit(&context, &school_id, grade_level, &result);
                UnitOutcome { school_id, grade_level, result }
            }));
        }
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = handle.await.context("Generation unit task panicked")?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

async fn generate_unit(
    context: &UnitContext,
    school_id: &str,
    grade_level: i32,
    pool: &QuestionPool,
) -> Result<Vec<GeneratedBooklet>, UnitError> {
    let unit_key = format!("{school_id}/{}/{}/{grade_level}", context.round_id, context.day);
    let baked = context.generator.generate(pool, &context.plan, &unit_key)?;

    let unit = UnitKey { school_id, round_id: &context.round_id, day: context.day, grade_level };
    let mut tx = context
        .db
        .begin()
        .await
        .context("Failed to begin generation transaction")
        .map_err(UnitError::Storage)?;

    let mut generated = Vec::with_capacity(baked.len());
    for booklet in &baked {
        match store_booklet(&mut tx, context, unit, booklet).await {
            Ok(stored) => generated.push(stored),
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(err);
            }
        }
    }

    tx.commit()
        .await
        .context("Failed to commit generated booklets")
        .map_err(UnitError::Storage)?;

    Ok(generated)
}

async fn store_booklet(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    context: &UnitContext,
    unit: UnitKey<'_>,
    booklet: &BakedBooklet,
) -> Result<GeneratedBooklet, UnitError> {
    let id = Uuid::new_v4().to_string();
    let title = booklet_title(&context.round_name, unit.grade_level, unit.day, &booklet.label);
    let answer_key = PersistedKeyMap::from_key_map(&booklet.key_map)
        .to_json()
        .context("Failed to serialize answer key")
        .map_err(UnitError::Storage)?;
    let stored = repositories::booklets::upsert_draft(
        &mut **tx,
        UpsertBooklet {
            id: &id,
            unit,
            variant: &booklet.label,
            is_master: booklet.is_master,
            title: &title,
            answer_key,
            // Stored bit for bit; the column is signed.
            seed: booklet.seed.map(|seed| seed as i64),
            now: primitive_now_utc(),
        },
    )
    .await
    .context("Failed to upsert booklet")
    .map_err(UnitError::Storage)?
    .ok_or_else(|| UnitError::Published { variant: booklet.label.clone() })?;

    Ok(GeneratedBooklet {
        id: stored.id,
        variant: stored.variant,
        is_master: stored.is_master,
        positions: booklet.key_map.len(),
    })
}

fn record_unit(
    context: &UnitContext,
    school_id: &str,
    grade_level: i32,
    result: &Result<Vec<GeneratedBooklet>, UnitError>,
) {
    match result {
        Ok(booklets) => {
            for booklet in booklets {
                metrics::counter!("booklets_generated_total", "variant" => booklet.variant.clone())
                    .increment(1);
            }
            metrics::counter!("generation_units_total", "status" => "ok").increment(1);
            tracing::info!(
                round_id = %context.round_id,
                school_id,
                grade_level,
                booklets = booklets.len(),
                "Generation unit stored"
            );
        }
        Err(err) => {
            metrics::counter!("generation_units_total", "status" => err.kind()).increment(1);
            tracing::warn!(
                round_id = %context.round_id,
                school_id,
                grade_level,
                error = %err,
                "Generation unit failed"
            );
        }
    }
}

pub(crate) fn booklet_title(round_name: &str, grade_level: i32, day: i32, variant: &str) -> String {
    format!("{round_name} - Grade {grade_level} - Day {day} - Variant {variant}")
}

fn group_by_grade(sections: Vec<ApprovedSection>) -> BTreeMap<i32, Vec<ApprovedSection>> {
    let mut grouped: BTreeMap<i32, Vec<ApprovedSection>> = BTreeMap::new();
    for section in sections {
        grouped.entry(section.grade_level).or_default().push(section);
    }
    grouped
}

async fn load_pool(db: &PgPool, sections: Vec<ApprovedSection>) -> anyhow::Result<QuestionPool> {
    let mut loaded = Vec::with_capacity(sections.len());
    for section in sections {
        let rows = repositories::questions::list_for_section(db, &section.section_id)
            .await
            .context("Failed to load section questions")?;
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let options = repositories::questions::list_options(db, &ids)
            .await
            .context("Failed to load question options")?;
        loaded.push((section, assemble_questions(rows, options)));
    }
    Ok(build_pool(loaded))
}

/// One subject run per subject code. Two approved sections of the same subject are joined in
/// the order they were listed, without repeating a question.
pub(crate) fn build_pool(sections: Vec<(ApprovedSection, Vec<Question>)>) -> QuestionPool {
    let mut subjects: Vec<SubjectPool> = Vec::new();
    for (section, questions) in sections {
        let index = match subjects.iter().position(|pool| pool.subject == section.subject_code) {
            Some(index) => index,
            None => {
                subjects.push(SubjectPool {
                    subject: section.subject_code.clone(),
                    sort_order: section.sort_order,
                    questions: Vec::new(),
                });
                subjects.len() - 1
            }
        };

        let run = &mut subjects[index];
        for question in questions {
            if !run.questions.iter().any(|existing| existing.id == question.id) {
                run.questions.push(question);
            }
        }
    }
    QuestionPool::new(subjects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::QuestionDifficulty;
    use crate::engine::pool::AnswerOption;

    fn section(id: &str, grade_level: i32, subject: &str, sort_order: i32) -> ApprovedSection {
        ApprovedSection {
            section_id: id.to_string(),
            grade_level,
            subject_code: subject.to_string(),
            sort_order,
        }
    }

    fn question(id: i64, subject: &str) -> Question {
        Question {
            id,
            subject: subject.to_string(),
            text: format!("question {id}"),
            difficulty: QuestionDifficulty::Medium,
            options: vec![
                AnswerOption { id: id * 10, text: "yes".into(), is_correct: true },
                AnswerOption { id: id * 10 + 1, text: "no".into(), is_correct: false },
            ],
        }
    }

    #[test]
    fn title_names_round_grade_day_and_variant() {
        assert_eq!(
            booklet_title("Spring 2026", 5, 2, "B"),
            "Spring 2026 - Grade 5 - Day 2 - Variant B"
        );
    }

    #[test]
    fn sections_group_by_grade_in_order() {
        let grouped = group_by_grade(vec![
            section("s1", 6, "MATH", 0),
            section("s2", 5, "MATH", 0),
            section("s3", 6, "RUS", 1),
        ]);
        let grades: Vec<i32> = grouped.keys().copied().collect();
        assert_eq!(grades, vec![5, 6]);
        assert_eq!(grouped[&6].len(), 2);
    }

    #[test]
    fn pool_orders_subjects_and_merges_duplicate_sections() {
        let pool = build_pool(vec![
            (section("s1", 5, "RUS", 1), vec![question(5, "RUS"), question(6, "RUS")]),
            (section("s2", 5, "MATH", 0), vec![question(1, "MATH")]),
            (section("s3", 5, "RUS", 1), vec![question(6, "RUS"), question(7, "RUS")]),
        ]);

        let subjects: Vec<&str> =
            pool.subjects().iter().map(|subject| subject.subject.as_str()).collect();
        assert_eq!(subjects, vec!["MATH", "RUS"]);

        let ids: Vec<i64> = pool.master_sequence().iter().map(|question| question.id).collect();
        assert_eq!(ids, vec![1, 5, 6, 7]);
    }

    #[test]
    fn units_that_overflow_the_answer_sheet_fail_as_generation_errors() {
        let plan = VariantPlan::from_labels(&["A".to_string(), "B".to_string()], "A").unwrap();
        let generator = VariantGenerator::new(Some(9)).with_sheet(SheetTemplate::new(4));

        let mut wide = question(1, "MATH");
        wide.options = (0..6)
            .map(|index| AnswerOption { id: 100 + index, text: "x".into(), is_correct: index == 5 })
            .collect();
        let pool = build_pool(vec![(section("s1", 5, "MATH", 0), vec![wide])]);
        let err = UnitError::from(generator.generate(&pool, &plan, "unit").unwrap_err());
        assert_eq!(err.kind(), "generation");
        assert!(err.to_string().contains("answer sheet prints 4"), "{err}");

        let long: Vec<Question> = (1..=51).map(|id| question(id, "MATH")).collect();
        let pool = build_pool(vec![(section("s1", 5, "MATH", 0), long)]);
        assert!(matches!(
            generator.generate(&pool, &plan, "unit"),
            Err(GenerationError::ExceedsSheetCapacity { positions: 51, capacity: 50 })
        ));
    }

    #[test]
    fn unit_error_kinds_are_stable_metric_labels() {
        assert_eq!(UnitError::Published { variant: "B".into() }.kind(), "published");
        assert_eq!(UnitError::NoApprovedSections { grade_level: 5 }.kind(), "no_approved_sections");
        assert_eq!(UnitError::Generation(GenerationError::EmptyPool).kind(), "generation");
    }
}
