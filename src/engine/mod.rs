//! Booklet baking and grading. Nothing in here touches the database or the network.

pub(crate) mod answer_key;
pub(crate) mod optical;
pub(crate) mod pool;
pub(crate) mod resolver;
pub(crate) mod spreadsheet;
pub(crate) mod validation;
pub(crate) mod variants;

#[cfg(test)]
mod tests {
    use crate::db::types::QuestionDifficulty;
    use crate::engine::answer_key::AnswerKeyMap;
    use crate::engine::optical::template::SheetTemplate;
    use crate::engine::optical::testing::{canonical_marker, draw_sheet, encode_png, StubDecoder};
    use crate::engine::optical::{OpticalPipeline, RecognitionConfig};
    use crate::engine::pool::{AnswerOption, Question, QuestionPool, SubjectPool};
    use crate::engine::resolver::resolve;
    use crate::engine::spreadsheet::{SpreadsheetAnswerAdapter, SpreadsheetTable, SubjectOffsets};
    use crate::engine::variants::{VariantGenerator, VariantPlan};

    fn subject(code: &str, order: i32, first_id: i64, count: i64) -> SubjectPool {
        SubjectPool {
            subject: code.to_string(),
            sort_order: order,
            questions: (first_id..first_id + count)
                .map(|id| Question {
                    id,
                    subject: code.to_string(),
                    text: format!("{code} question {id}"),
                    difficulty: QuestionDifficulty::Medium,
                    options: (0..4)
                        .map(|index| AnswerOption {
                            id: id * 10 + index,
                            text: format!("option {index}"),
                            is_correct: index == id % 4,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn booklets() -> (AnswerKeyMap, AnswerKeyMap) {
        let pool = QuestionPool::new(vec![subject("MATH", 0, 1, 4), subject("RUS", 1, 5, 3)]);
        let labels = ["A".to_string(), "B".to_string()];
        let plan = VariantPlan::from_labels(&labels, "A").expect("plan");
        let mut baked = VariantGenerator::new(Some(11))
            .generate(&pool, &plan, "school-1/grade-5")
            .expect("generate");
        let shuffled = baked.remove(1);
        let master = baked.remove(0);
        (master.key_map, shuffled.key_map)
    }

    #[test]
    fn spreadsheet_row_and_scanned_sheet_grade_identically() {
        let (master, variant) = booklets();
        // Position 3 left blank, position 6 deliberately wrong.
        let picks: Vec<Option<usize>> = variant
            .entries()
            .iter()
            .map(|entry| match entry.position {
                3 => None,
                6 => Some((entry.correct.index() + 1) % 4),
                _ => Some(entry.correct.index()),
            })
            .collect();

        let template = SheetTemplate::new(4);
        let sheet = draw_sheet(&template, &picks, true);
        let marker = canonical_marker(&template, r#"{"uid": "17", "eid": "b-1"}"#);
        let config = RecognitionConfig { render_overlay: false, ..RecognitionConfig::default() };
        let pipeline = OpticalPipeline::new(StubDecoder { marker: Some(marker) }, config);
        let decoded = pipeline.decode(&encode_png(&sheet)).expect("decode");
        let scanned = pipeline.read_answers(&decoded, variant.len());
        assert!(!scanned.low_confidence);

        // Spreadsheet columns are named by master subject run, and read back as positions.
        let offsets = SubjectOffsets::from_master(&master);
        let mut headers = vec!["Student ID".to_string(), "Variant".to_string()];
        let mut cells = vec!["17".to_string(), "Б".to_string()];
        for run in master.subject_runs() {
            for within in 1..=run.len {
                let position = offsets.absolute_position(&run.subject, within).expect("offset");
                headers.push(format!("{}_{within}", run.subject));
                let pick = picks[position as usize - 1];
                let letter = pick.map(|index| ["a", "b", "c", "d"][index].to_string());
                cells.push(letter.unwrap_or_default());
            }
        }
        let csv = format!("{}\n{}\n", headers.join(";"), cells.join(";"));
        let table = SpreadsheetTable::from_csv_bytes(csv.as_bytes()).expect("table");
        let adapter = SpreadsheetAnswerAdapter::new(offsets);
        let layout = adapter.layout(table.headers()).expect("layout");
        let row = adapter.read_row(&layout, &table.rows()[0]).expect("row");
        assert_eq!(row.variant, "B");

        let from_sheet = resolve("b-1", "17", &variant, &scanned.answers);
        let from_table = resolve("b-1", "17", &variant, &row.answers);
        assert_eq!(from_sheet, from_table);
        assert_eq!(from_sheet.max_score, 7);
        assert_eq!(from_sheet.score, 5);
    }
}
