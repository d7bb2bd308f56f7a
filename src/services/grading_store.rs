//! Where graders look up booklets and students, and where graded results go.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::Booklet;
use crate::db::types::{BookletStatus, GradingSource};
use crate::engine::answer_key::AnswerKeyMap;
use crate::engine::resolver::GradedResult;
use crate::engine::spreadsheet::student_ref_candidates;
use crate::repositories;
use crate::repositories::booklets::UnitKey;
use crate::repositories::results::UpsertResult;
use crate::services::answer_keys;

/// A booklet with its key map already normalized.
#[derive(Debug, Clone)]
pub(crate) struct LoadedBooklet {
    pub(crate) id: String,
    pub(crate) school_id: String,
    pub(crate) variant: String,
    pub(crate) is_master: bool,
    pub(crate) status: BookletStatus,
    pub(crate) key_map: AnswerKeyMap,
}

impl LoadedBooklet {
    /// Only a published booklet's key is frozen, so only it may be graded against.
    pub(crate) fn is_gradable(&self) -> bool {
        self.status == BookletStatus::Published
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct UnitSelector {
    pub(crate) school_id: String,
    pub(crate) round_id: String,
    pub(crate) day: i32,
    pub(crate) grade_level: i32,
}

impl UnitSelector {
    fn key(&self) -> UnitKey<'_> {
        UnitKey {
            school_id: &self.school_id,
            round_id: &self.round_id,
            day: self.day,
            grade_level: self.grade_level,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GradedRecord {
    pub(crate) student_id: String,
    pub(crate) result: GradedResult,
    pub(crate) source: GradingSource,
}

#[async_trait]
pub(crate) trait GradingStore: Send + Sync {
    async fn booklet(&self, booklet_id: &str) -> Result<Option<LoadedBooklet>>;

    /// Every variant of one unit, master first.
    async fn unit_booklets(&self, unit: &UnitSelector) -> Result<Vec<LoadedBooklet>>;

    /// Resolves a student reference within a school: first as a student id, then as an
    /// external reference in its raw, unpadded and zero-padded forms.
    async fn find_student(&self, school_id: &str, student_ref: &str) -> Result<Option<String>>;

    /// Upserts the result and returns its id.
    async fn save(&self, record: &GradedRecord) -> Result<String>;
}

#[derive(Clone)]
pub(crate) struct PgGradingStore {
    pool: PgPool,
}

impl PgGradingStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, booklet: Booklet) -> Result<LoadedBooklet> {
        let key_map = answer_keys::load_key_map(&self.pool, &booklet).await?;
        Ok(LoadedBooklet {
            id: booklet.id,
            school_id: booklet.school_id,
            variant: booklet.variant,
            is_master: booklet.is_master,
            status: booklet.status,
            key_map,
        })
    }
}

#[async_trait]
impl GradingStore for PgGradingStore {
    async fn booklet(&self, booklet_id: &str) -> Result<Option<LoadedBooklet>> {
        let Some(booklet) = repositories::booklets::find_by_id(&self.pool, booklet_id)
            .await
            .context("Failed to fetch booklet")?
        else {
            return Ok(None);
        };
        Ok(Some(self.load(booklet).await?))
    }

    async fn unit_booklets(&self, unit: &UnitSelector) -> Result<Vec<LoadedBooklet>> {
        let booklets = repositories::booklets::list_for_unit(&self.pool, unit.key())
            .await
            .context("Failed to list unit booklets")?;

        let mut loaded = Vec::with_capacity(booklets.len());
        for booklet in booklets {
            loaded.push(self.load(booklet).await?);
        }
        Ok(loaded)
    }

    async fn find_student(&self, school_id: &str, student_ref: &str) -> Result<Option<String>> {
        if let Some(student) = repositories::students::find_by_id(&self.pool, student_ref)
            .await
            .context("Failed to fetch student")?
        {
            if student.school_id == school_id {
                return Ok(Some(student.id));
            }
        }

        let candidates = student_ref_candidates(student_ref);
        let students = repositories::students::list_by_external_refs(
            &self.pool,
            Some(school_id),
            &candidates,
        )
        .await
        .context("Failed to look up students by reference")?;

        Ok(candidates.iter().find_map(|candidate| {
            students
                .iter()
                .find(|student| &student.external_ref == candidate)
                .map(|student| student.id.clone())
        }))
    }

    async fn save(&self, record: &GradedRecord) -> Result<String> {
        let result = &record.result;
        let id = Uuid::new_v4().to_string();
        let row = repositories::results::upsert(
            &self.pool,
            UpsertResult {
                id: &id,
                booklet_id: &result.booklet_id,
                student_id: &record.student_id,
                score: result.score as i32,
                max_score: result.max_score as i32,
                percentage: result.percentage,
                per_position: serde_json::to_value(&result.per_position)
                    .context("Failed to encode per-position outcomes")?,
                per_subject: serde_json::to_value(&result.per_subject)
                    .context("Failed to encode per-subject tallies")?,
                low_confidence: result.low_confidence,
                source: record.source,
                now: primitive_now_utc(),
            },
        )
        .await
        .context("Failed to store graded result")?;

        Ok(row.id)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub(crate) struct MemoryStudent {
        pub(crate) id: String,
        pub(crate) school_id: String,
        pub(crate) external_ref: String,
    }

    /// Keeps everything in process; results are keyed like the database keys them.
    #[derive(Default)]
    pub(crate) struct MemoryGradingStore {
        pub(crate) booklets: Vec<(UnitSelector, LoadedBooklet)>,
        pub(crate) students: Vec<MemoryStudent>,
        pub(crate) saved: Mutex<HashMap<(String, String), GradedRecord>>,
    }

    impl MemoryGradingStore {
        pub(crate) fn saved(&self) -> Vec<GradedRecord> {
            let saved = self.saved.lock().expect("store lock");
            let mut records: Vec<GradedRecord> = saved.values().cloned().collect();
            records.sort_by(|left, right| left.student_id.cmp(&right.student_id));
            records
        }
    }

    #[async_trait]
    impl GradingStore for MemoryGradingStore {
        async fn booklet(&self, booklet_id: &str) -> Result<Option<LoadedBooklet>> {
            Ok(self
                .booklets
                .iter()
                .find(|(_, booklet)| booklet.id == booklet_id)
                .map(|(_, booklet)| booklet.clone()))
        }

        async fn unit_booklets(&self, unit: &UnitSelector) -> Result<Vec<LoadedBooklet>> {
            let mut booklets: Vec<LoadedBooklet> = self
                .booklets
                .iter()
                .filter(|(selector, _)| selector == unit)
                .map(|(_, booklet)| booklet.clone())
                .collect();
            booklets.sort_by(|left, right| {
                right.is_master.cmp(&left.is_master).then_with(|| left.variant.cmp(&right.variant))
            });
            Ok(booklets)
        }

        async fn find_student(
            &self,
            school_id: &str,
            student_ref: &str,
        ) -> Result<Option<String>> {
            let in_school = |student: &&MemoryStudent| student.school_id == school_id;
            if let Some(student) =
                self.students.iter().filter(in_school).find(|student| student.id == student_ref)
            {
                return Ok(Some(student.id.clone()));
            }
            Ok(student_ref_candidates(student_ref).iter().find_map(|candidate| {
                self.students
                    .iter()
                    .filter(in_school)
                    .find(|student| &student.external_ref == candidate)
                    .map(|student| student.id.clone())
            }))
        }

        async fn save(&self, record: &GradedRecord) -> Result<String> {
            let key = (record.student_id.clone(), record.result.booklet_id.clone());
            self.saved.lock().expect("store lock").insert(key.clone(), record.clone());
            Ok(format!("{}:{}", key.0, key.1))
        }
    }
}
