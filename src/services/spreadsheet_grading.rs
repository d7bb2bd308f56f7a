use serde::Serialize;
use thiserror::Error;

use crate::db::types::GradingSource;
use crate::engine::resolver::resolve;
use crate::engine::spreadsheet::{
    SpreadsheetAnswerAdapter, SpreadsheetError, SpreadsheetTable, SubjectOffsets,
};
use crate::services::grading_store::{GradedRecord, GradingStore, LoadedBooklet, UnitSelector};

pub(crate) const MAX_REPORTED_ERRORS: usize = 10;

#[derive(Debug, Error)]
pub(crate) enum SpreadsheetGradingError {
    #[error("no booklets have been generated for this school, round, day and grade")]
    NoBooklets,
    #[error("this unit has no master booklet to map subject columns from")]
    NoMaster,
    #[error("booklet {booklet_id} is not published yet")]
    NotPublished { booklet_id: String },
    #[error(transparent)]
    Spreadsheet(#[from] SpreadsheetError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct RowError {
    /// 1-based line in the file, header included.
    pub(crate) row: usize,
    pub(crate) message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct SpreadsheetOutcome {
    pub(crate) processed: usize,
    pub(crate) failed: usize,
    pub(crate) errors: Vec<RowError>,
    /// Answer-looking headers that name no subject run of the master booklet.
    pub(crate) unmatched_columns: Vec<String>,
}

/// Grades every row of an uploaded table against the unit's booklets. A bad row is reported
/// and skipped; the rest of the file is still graded.
pub(crate) async fn grade_spreadsheet(
    store: &dyn GradingStore,
    unit: &UnitSelector,
    bytes: &[u8],
) -> Result<SpreadsheetOutcome, SpreadsheetGradingError> {
    let booklets = store.unit_booklets(unit).await?;
    if booklets.is_empty() {
        return Err(SpreadsheetGradingError::NoBooklets);
    }
    let master = booklets
        .iter()
        .find(|booklet| booklet.is_master)
        .ok_or(SpreadsheetGradingError::NoMaster)?;
    if !master.is_gradable() {
        return Err(SpreadsheetGradingError::NotPublished { booklet_id: master.id.clone() });
    }

    let table = SpreadsheetTable::from_upload_bytes(bytes)?;
    let adapter = SpreadsheetAnswerAdapter::new(SubjectOffsets::from_master(&master.key_map));
    let layout = adapter.layout(table.headers())?;

    let mut outcome =
        SpreadsheetOutcome { unmatched_columns: layout.unmatched.clone(), ..Default::default() };

    for (index, row) in table.rows().iter().enumerate() {
        let line = index + 2;
        let graded = async {
            let read = adapter.read_row(&layout, row).map_err(|err| err.to_string())?;
            let student_ref =
                read.student_ref.ok_or_else(|| "row has no student id".to_string())?;
            let booklet = find_variant(&booklets, &read.variant)
                .ok_or_else(|| format!("no booklet for variant {}", read.variant))?;
            if !booklet.is_gradable() {
                return Err(format!("booklet for variant {} is not published", read.variant));
            }

            let student_id = store
                .find_student(&unit.school_id, &student_ref)
                .await
                .map_err(|err| storage_failure(line, &err))?
                .ok_or_else(|| format!("student {student_ref} not found in this school"))?;

            let result = resolve(&booklet.id, &student_ref, &booklet.key_map, &read.answers);
            let record = GradedRecord { student_id, result, source: GradingSource::Spreadsheet };
            store.save(&record).await.map_err(|err| storage_failure(line, &err))?;
            Ok::<(), String>(())
        }
        .await;

        match graded {
            Ok(()) => {
                outcome.processed += 1;
                metrics::counter!("spreadsheet_rows_total", "status" => "graded").increment(1);
            }
            Err(message) => {
                outcome.failed += 1;
                metrics::counter!("spreadsheet_rows_total", "status" => "failed").increment(1);
                if outcome.errors.len() < MAX_REPORTED_ERRORS {
                    outcome.errors.push(RowError { row: line, message });
                }
            }
        }
    }

    tracing::info!(
        school_id = %unit.school_id,
        round_id = %unit.round_id,
        day = unit.day,
        grade_level = unit.grade_level,
        processed = outcome.processed,
        failed = outcome.failed,
        "Spreadsheet graded"
    );

    Ok(outcome)
}

fn find_variant<'a>(booklets: &'a [LoadedBooklet], variant: &str) -> Option<&'a LoadedBooklet> {
    booklets.iter().find(|booklet| booklet.variant.eq_ignore_ascii_case(variant))
}

fn storage_failure(line: usize, err: &anyhow::Error) -> String {
    tracing::error!(error = %format!("{err:#}"), row = line, "Failed to grade spreadsheet row");
    "internal error while storing the result".to_string()
}
