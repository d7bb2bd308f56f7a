use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::db::types::GradingSource;
use crate::engine::optical::identity::IdentityDecoder;
use crate::engine::optical::{OpticalPipeline, ScanError};
use crate::engine::resolver::resolve;
use crate::services::grading_store::{GradedRecord, GradingStore};

#[derive(Debug, Error)]
pub(crate) enum ScanGradingError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("booklet {booklet_id} is not published yet")]
    NotPublished { booklet_id: String },
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl ScanGradingError {
    /// Retrying a terminal failure reads the same sheet the same way.
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, Self::Scan(_) | Self::NotPublished { .. })
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Scan(err) => err.kind(),
            Self::NotPublished { .. } => "not_published",
            Self::Infrastructure(_) => "internal",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ScanOutcome {
    pub(crate) result_id: String,
    pub(crate) booklet_id: String,
    pub(crate) student_id: String,
    pub(crate) score: u32,
    pub(crate) max_score: u32,
    pub(crate) percentage: f64,
    pub(crate) low_confidence: bool,
    pub(crate) note: Option<String>,
    /// PNG bytes.
    pub(crate) overlay: Option<Vec<u8>>,
}

#[derive(Debug)]
pub(crate) struct ScanUpload {
    pub(crate) filename: Option<String>,
    pub(crate) bytes: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct FileOutcome {
    pub(crate) filename: Option<String>,
    pub(crate) result: Result<ScanOutcome, ScanGradingError>,
}

/// Reads one photographed sheet, grades it against the booklet its identity marker names and
/// stores the result. Image work runs on the blocking pool.
pub(crate) async fn grade_scan<D>(
    pipeline: Arc<OpticalPipeline<D>>,
    store: &dyn GradingStore,
    bytes: Vec<u8>,
) -> Result<ScanOutcome, ScanGradingError>
where
    D: IdentityDecoder + 'static,
{
    let started = Instant::now();
    let outcome = grade_scan_inner(pipeline, store, bytes).await;

    metrics::histogram!("scan_recognition_seconds").record(started.elapsed().as_secs_f64());
    let status = match &outcome {
        Ok(scan) if scan.low_confidence => "low_confidence",
        Ok(_) => "graded",
        Err(err) => err.kind(),
    };
    metrics::counter!("scans_processed_total", "status" => status).increment(1);

    outcome
}

async fn grade_scan_inner<D>(
    pipeline: Arc<OpticalPipeline<D>>,
    store: &dyn GradingStore,
    bytes: Vec<u8>,
) -> Result<ScanOutcome, ScanGradingError>
where
    D: IdentityDecoder + 'static,
{
    let decoder = pipeline.clone();
    let sheet = tokio::task::spawn_blocking(move || decoder.decode(&bytes))
        .await
        .context("Scan decode task failed")??;
    let identity = sheet.identity().clone();

    let booklet = store
        .booklet(&identity.booklet_id)
        .await?
        .ok_or_else(|| ScanError::ReferenceNotFound(format!("booklet {}", identity.booklet_id)))?;
    if !booklet.is_gradable() {
        return Err(ScanGradingError::NotPublished { booklet_id: booklet.id });
    }
    let student_id = store
        .find_student(&booklet.school_id, &identity.student_ref)
        .await?
        .ok_or_else(|| ScanError::ReferenceNotFound(format!("student {}", identity.student_ref)))?;

    let variant_mismatch = identity
        .variant
        .as_deref()
        .is_some_and(|variant| !variant.trim().eq_ignore_ascii_case(&booklet.variant));
    if variant_mismatch {
        tracing::warn!(
            booklet_id = %booklet.id,
            printed = ?identity.variant,
            stored = %booklet.variant,
            "Sheet variant differs from its booklet"
        );
    }

    let positions = booklet.key_map.len();
    let reader = pipeline.clone();
    let reading = tokio::task::spawn_blocking(move || reader.read_answers(&sheet, positions))
        .await
        .context("Scan recognition task failed")?;

    let printed = pipeline.config().option_count;
    let too_wide = booklet.key_map.max_option_count() > printed;
    if too_wide {
        tracing::warn!(
            booklet_id = %booklet.id,
            options = booklet.key_map.max_option_count(),
            printed,
            "Booklet has rows wider than the answer sheet"
        );
    }

    let low_confidence = reading.low_confidence || variant_mismatch || too_wide;
    let note = reading
        .note
        .or_else(|| {
            too_wide.then(|| format!("booklet has rows wider than the {printed} printed options"))
        })
        .or_else(|| variant_mismatch.then(|| "printed variant does not match the booklet".into()));

    let result = resolve(&booklet.id, &identity.student_ref, &booklet.key_map, &reading.answers)
        .with_low_confidence(low_confidence);
    let record = GradedRecord { student_id, result, source: GradingSource::Optical };
    let result_id = store.save(&record).await?;

    tracing::info!(
        booklet_id = %booklet.id,
        student_id = %record.student_id,
        score = record.result.score,
        max_score = record.result.max_score,
        low_confidence,
        "Scan graded"
    );

    Ok(ScanOutcome {
        result_id,
        booklet_id: booklet.id,
        student_id: record.student_id,
        score: record.result.score,
        max_score: record.result.max_score,
        percentage: record.result.percentage,
        low_confidence,
        note,
        overlay: reading.overlay,
    })
}

/// Grades a batch, at most `concurrency` sheets at a time. One sheet failing never affects
/// another; outcomes come back in upload order.
pub(crate) async fn grade_scans<D>(
    pipeline: Arc<OpticalPipeline<D>>,
    store: Arc<dyn GradingStore>,
    uploads: Vec<ScanUpload>,
    concurrency: usize,
) -> Vec<FileOutcome>
where
    D: IdentityDecoder + 'static,
{
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(uploads.len());

    for upload in uploads {
        let pipeline = pipeline.clone();
        let store = store.clone();
        let permits = permits.clone();
        let filename = upload.filename.clone();

        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.context("Scan batch closed")?;
            grade_scan(pipeline, store.as_ref(), upload.bytes).await
        });
        handles.push((filename, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (filename, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(err) => Err(ScanGradingError::Infrastructure(
                anyhow::Error::new(err).context("Scan grading task panicked"),
            )),
        };
        if let Err(err) = &result {
            tracing::warn!(filename = ?filename, kind = err.kind(), error = %err, "Scan not graded");
        }
        outcomes.push(FileOutcome { filename, result });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::{BookletStatus, QuestionDifficulty};
    use crate::engine::answer_key::AnswerKeyMap;
    use crate::engine::optical::template::SheetTemplate;
    use crate::engine::optical::testing::{canonical_marker, draw_sheet, encode_png, StubDecoder};
    use crate::engine::optical::RecognitionConfig;
    use crate::engine::pool::{AnswerOption, Question, QuestionPool, SubjectPool};
    use crate::engine::variants::{VariantGenerator, VariantPlan};
    use crate::services::grading_store::memory::{MemoryGradingStore, MemoryStudent};
    use crate::services::grading_store::{LoadedBooklet, UnitSelector};

    const PAYLOAD: &str = r#"{"studentRef": "42", "bookletId": "booklet-B", "variant": "B"}"#;

    fn key_map() -> AnswerKeyMap {
        key_map_with_options(4)
    }

    fn key_map_with_options(options: i64) -> AnswerKeyMap {
        let questions = (1..=6)
            .map(|id| Question {
                id,
                subject: "MATH".to_string(),
                text: format!("question {id}"),
                difficulty: QuestionDifficulty::Easy,
                options: (0..options)
                    .map(|index| AnswerOption {
                        id: id * 10 + index,
                        text: format!("{index}"),
                        is_correct: index == 1,
                    })
                    .collect(),
            })
            .collect();
        let pool = QuestionPool::new(vec![SubjectPool {
            subject: "MATH".to_string(),
            sort_order: 0,
            questions,
        }]);
        let labels = ["A".to_string(), "B".to_string()];
        let plan = VariantPlan::from_labels(&labels, "A").expect("plan");
        let mut baked = VariantGenerator::new(Some(5)).generate(&pool, &plan, "unit").expect("bake");
        baked.remove(1).key_map
    }

    fn store(key_map: AnswerKeyMap) -> Arc<MemoryGradingStore> {
        store_with_status(key_map, BookletStatus::Published)
    }

    fn store_with_status(key_map: AnswerKeyMap, status: BookletStatus) -> Arc<MemoryGradingStore> {
        let unit = UnitSelector {
            school_id: "school-1".to_string(),
            round_id: "round-1".to_string(),
            day: 1,
            grade_level: 5,
        };
        let booklet = LoadedBooklet {
            id: "booklet-B".to_string(),
            school_id: "school-1".to_string(),
            variant: "B".to_string(),
            is_master: false,
            status,
            key_map,
        };
        Arc::new(MemoryGradingStore {
            booklets: vec![(unit, booklet)],
            students: vec![MemoryStudent {
                id: "st-42".to_string(),
                school_id: "school-1".to_string(),
                external_ref: "000042".to_string(),
            }],
            ..Default::default()
        })
    }

    fn pipeline(payload: Option<&str>) -> Arc<OpticalPipeline<StubDecoder>> {
        let template = SheetTemplate::new(4);
        let marker = payload.map(|payload| canonical_marker(&template, payload));
        let config = RecognitionConfig { render_overlay: true, ..RecognitionConfig::default() };
        Arc::new(OpticalPipeline::new(StubDecoder { marker }, config))
    }

    /// Correct everywhere except position 2, which is left blank.
    fn sheet(key_map: &AnswerKeyMap) -> Vec<u8> {
        let picks: Vec<Option<usize>> = key_map
            .entries()
            .iter()
            .map(|entry| (entry.position != 2).then_some(entry.correct.index()))
            .collect();
        encode_png(&draw_sheet(&SheetTemplate::new(4), &picks, true))
    }

    #[tokio::test]
    async fn grades_a_scanned_sheet_and_stores_it() {
        let key_map = key_map();
        let bytes = sheet(&key_map);
        let store = store(key_map);

        let outcome =
            grade_scan(pipeline(Some(PAYLOAD)), store.as_ref(), bytes).await.expect("graded");
        assert_eq!(outcome.student_id, "st-42");
        assert_eq!(outcome.score, 5);
        assert_eq!(outcome.max_score, 6);
        assert!(!outcome.low_confidence);
        assert!(outcome.overlay.is_some_and(|png| png.starts_with(b"\x89PNG")));

        let saved = store.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].source, GradingSource::Optical);
    }

    #[tokio::test]
    async fn unknown_references_and_unreadable_sheets_are_terminal() {
        let key_map = key_map();
        let bytes = sheet(&key_map);
        let store = store(key_map);

        let unknown_booklet = r#"{"uid": "42", "eid": "booklet-Z"}"#;
        let err = grade_scan(pipeline(Some(unknown_booklet)), store.as_ref(), bytes.clone())
            .await
            .unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(err.kind(), "reference_not_found");

        let unknown_student = r#"{"uid": 7, "eid": "booklet-B"}"#;
        let err = grade_scan(pipeline(Some(unknown_student)), store.as_ref(), bytes.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "reference_not_found");

        let err = grade_scan(pipeline(None), store.as_ref(), bytes).await.unwrap_err();
        assert_eq!(err.kind(), "identity_not_found");

        let err = grade_scan(pipeline(Some(PAYLOAD)), store.as_ref(), b"not an image".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "decode");
        assert!(store.saved().is_empty());
    }

    #[tokio::test]
    async fn draft_booklets_are_not_graded() {
        let key_map = key_map();
        let bytes = sheet(&key_map);
        let store = store_with_status(key_map, BookletStatus::Draft);

        let err = grade_scan(pipeline(Some(PAYLOAD)), store.as_ref(), bytes).await.unwrap_err();
        assert!(matches!(
            &err,
            ScanGradingError::NotPublished { booklet_id } if booklet_id == "booklet-B"
        ));
        assert!(err.is_terminal());
        assert_eq!(err.kind(), "not_published");
        assert!(store.saved().is_empty());
    }

    #[tokio::test]
    async fn key_wider_than_the_sheet_is_low_confidence() {
        let key_map = key_map_with_options(5);
        assert_eq!(key_map.max_option_count(), 5);
        let picks: Vec<Option<usize>> =
            key_map.entries().iter().map(|entry| Some(entry.correct.index().min(3))).collect();
        let bytes = encode_png(&draw_sheet(&SheetTemplate::new(4), &picks, true));
        let store = store(key_map);

        let outcome =
            grade_scan(pipeline(Some(PAYLOAD)), store.as_ref(), bytes).await.expect("graded");
        assert!(outcome.low_confidence);
        let note = outcome.note.as_deref().unwrap_or_default();
        assert!(note.contains("wider"), "{note}");
        assert!(store.saved()[0].result.low_confidence);
    }

    #[tokio::test]
    async fn batch_keeps_going_past_a_bad_file() {
        let key_map = key_map();
        let bytes = sheet(&key_map);
        let store = store(key_map);

        let uploads = vec![
            ScanUpload { filename: Some("broken.png".into()), bytes: b"garbage".to_vec() },
            ScanUpload { filename: Some("good.png".into()), bytes },
        ];
        let outcomes = grade_scans(pipeline(Some(PAYLOAD)), store.clone(), uploads, 2).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].filename.as_deref(), Some("broken.png"));
        assert!(outcomes[0].result.is_err());
        let good = outcomes[1].result.as_ref().expect("good sheet graded");
        assert_eq!(good.score, 5);
    }
}
