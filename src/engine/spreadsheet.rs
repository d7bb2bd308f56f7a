//! Answer extraction from tabular uploads.
//!
//! Answer columns are named `<SUBJECT>_<n>` with `n` counted from 1 inside the subject. The
//! absolute booklet position is the subject's offset in the master order plus `n`, so column
//! order in the file never matters.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Cursor;

use calamine::{Data, Range, Reader};
use encoding_rs::{UTF_8, WINDOWS_1251};
use thiserror::Error;

use crate::engine::answer_key::{AnswerKeyMap, OptionLetter};
use crate::engine::resolver::RawAnswers;

const VARIANT_TOKENS: &[&str] = &["variant", "вариант", "вар.", "var."];
const VARIANT_EXACT: &[&str] = &["var", "вар", "v", "в"];
const ID_COLUMNS: &[&str] =
    &["student id", "id", "code", "custom_id", "код", "номер", "student_id"];
const BLANK_CELLS: &[&str] = &["", "nan", "none", "null", "-"];
const CYRILLIC_ORDINAL: [char; 6] = ['А', 'Б', 'В', 'Г', 'Д', 'Е'];
/// Looks like a Latin `C` and is typed for it often enough.
const CYRILLIC_ES: char = 'С';
const CANONICAL_VARIANTS: usize = 4;
/// Zip container (xlsx, ods) and OLE compound file (xls).
const WORKBOOK_MAGIC: &[&[u8]] = &[b"PK\x03\x04", b"\xD0\xCF\x11\xE0"];

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum SpreadsheetError {
    #[error("unknown variant label {0:?}")]
    UnknownVariant(String),
    #[error("no column header names the variant")]
    MissingVariantColumn,
    #[error("malformed spreadsheet: {0}")]
    Malformed(String),
}

/// Header plus string cells, as read from an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpreadsheetTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SpreadsheetTable {
    pub(crate) fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers = headers.into_iter().map(|header| header.trim().to_string()).collect();
        Self { headers, rows }
    }

    /// Reads either a workbook or delimited text, told apart by the file's leading bytes.
    pub(crate) fn from_upload_bytes(bytes: &[u8]) -> Result<Self, SpreadsheetError> {
        if WORKBOOK_MAGIC.iter().any(|magic| bytes.starts_with(magic)) {
            Self::from_workbook_bytes(bytes)
        } else {
            Self::from_csv_bytes(bytes)
        }
    }

    /// The first worksheet of an xlsx, xls or ods workbook.
    pub(crate) fn from_workbook_bytes(bytes: &[u8]) -> Result<Self, SpreadsheetError> {
        let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|err| SpreadsheetError::Malformed(err.to_string()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| SpreadsheetError::Malformed("workbook has no sheets".to_string()))?
            .map_err(|err| SpreadsheetError::Malformed(err.to_string()))?;
        Self::from_range(&range)
    }

    pub(crate) fn from_range(range: &Range<Data>) -> Result<Self, SpreadsheetError> {
        let mut rows = range.rows().map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
        let headers = rows.next().unwrap_or_default();
        if headers.iter().all(|header| header.trim().is_empty()) {
            return Err(SpreadsheetError::Malformed("header row is empty".to_string()));
        }
        let rows = rows.filter(|row| row.iter().any(|cell| !cell.is_empty())).collect();
        Ok(Self::new(headers, rows))
    }

    /// Parses CSV with the delimiter sniffed from the header line. Text that is not UTF-8 is
    /// read as Windows-1251.
    pub(crate) fn from_csv_bytes(bytes: &[u8]) -> Result<Self, SpreadsheetError> {
        let decoded = decode_text(bytes);
        let text = decoded.strip_prefix('\u{feff}').unwrap_or(&*decoded);
        let header_line = text.lines().next().unwrap_or_default();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(sniff_delimiter(header_line))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|err| SpreadsheetError::Malformed(err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if headers.iter().all(|header| header.is_empty()) {
            return Err(SpreadsheetError::Malformed("header row is empty".to_string()));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| SpreadsheetError::Malformed(err.to_string()))?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self::new(headers, rows))
    }

    pub(crate) fn headers(&self) -> &[String] {
        &self.headers
    }

    pub(crate) fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}

fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    match UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => text,
        None => WINDOWS_1251.decode_without_bom_handling(bytes).0,
    }
}

/// Workbook cells as the CSV reader would have produced them. Whole numbers lose the `.0`
/// spreadsheets add to numeric ids.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.trim().to_string(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        other => other.to_string().trim().to_string(),
    }
}

fn sniff_delimiter(header_line: &str) -> u8 {
    // Ties resolve to the last candidate, so comma wins an empty count.
    [b'\t', b';', b',']
        .into_iter()
        .max_by_key(|delimiter| header_line.bytes().filter(|byte| byte == delimiter).count())
        .unwrap_or(b',')
}

/// Where each subject's run starts in the master booklet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SubjectOffsets {
    offsets: HashMap<String, (u32, u32)>,
}

impl SubjectOffsets {
    /// Built from the master key, whose subject runs are contiguous. A subject tag that
    /// appears in more than one run keeps its first run.
    pub(crate) fn from_master(master: &AnswerKeyMap) -> Self {
        let mut offsets = HashMap::new();
        for run in master.subject_runs() {
            offsets.entry(run.subject.to_uppercase()).or_insert((run.first_position - 1, run.len));
        }
        Self { offsets }
    }

    pub(crate) fn absolute_position(&self, subject: &str, within_subject: u32) -> Option<u32> {
        let (offset, len) = self.offsets.get(&subject.trim().to_uppercase())?;
        (within_subject >= 1 && within_subject <= *len).then_some(offset + within_subject)
    }
}

/// Column roles for one table, resolved once from the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnLayout {
    pub(crate) variant_column: usize,
    pub(crate) id_column: Option<usize>,
    pub(crate) answer_columns: Vec<(usize, u32)>,
    /// `<SUBJECT>_<n>` headers whose subject or number does not fit the master booklet.
    pub(crate) unmatched: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RowAnswers {
    pub(crate) variant: String,
    pub(crate) student_ref: Option<String>,
    pub(crate) answers: RawAnswers,
}

#[derive(Debug, Clone)]
pub(crate) struct SpreadsheetAnswerAdapter {
    offsets: SubjectOffsets,
}

impl SpreadsheetAnswerAdapter {
    pub(crate) fn new(offsets: SubjectOffsets) -> Self {
        Self { offsets }
    }

    pub(crate) fn layout(&self, headers: &[String]) -> Result<ColumnLayout, SpreadsheetError> {
        let variant_column = headers
            .iter()
            .position(|header| is_variant_header(header))
            .ok_or(SpreadsheetError::MissingVariantColumn)?;

        let mut answer_columns = Vec::new();
        let mut unmatched = Vec::new();
        for (index, header) in headers.iter().enumerate() {
            if index == variant_column {
                continue;
            }
            let Some((subject, number)) = parse_answer_header(header) else {
                continue;
            };
            match self.offsets.absolute_position(subject, number) {
                Some(position) => answer_columns.push((index, position)),
                None => unmatched.push(header.clone()),
            }
        }

        Ok(ColumnLayout {
            variant_column,
            id_column: find_id_column(headers),
            answer_columns,
            unmatched,
        })
    }

    pub(crate) fn read_row(
        &self,
        layout: &ColumnLayout,
        row: &[String],
    ) -> Result<RowAnswers, SpreadsheetError> {
        let cell = |index: usize| row.get(index).map(String::as_str).unwrap_or_default();

        let variant = normalize_variant_label(cell(layout.variant_column))?;
        let student_ref = layout
            .id_column
            .map(|index| clean_student_ref(cell(index)))
            .filter(|value| !value.is_empty());

        let answers = layout
            .answer_columns
            .iter()
            .map(|(index, position)| (*position, fold_letter(cell(*index))))
            .collect();

        Ok(RowAnswers { variant, student_ref, answers })
    }
}

fn parse_answer_header(header: &str) -> Option<(&str, u32)> {
    let (subject, number) = header.trim().rsplit_once('_')?;
    let subject = subject.trim();
    if subject.is_empty() {
        return None;
    }
    let number = number.trim().parse::<u32>().ok()?;
    Some((subject, number))
}

pub(crate) fn is_variant_header(header: &str) -> bool {
    let lowered = header.trim().to_lowercase();
    VARIANT_TOKENS.iter().any(|token| lowered.contains(token))
        || VARIANT_EXACT.iter().any(|token| lowered == *token)
}

pub(crate) fn find_id_column(headers: &[String]) -> Option<usize> {
    let lowered: Vec<String> = headers.iter().map(|header| header.trim().to_lowercase()).collect();
    ID_COLUMNS.iter().find_map(|candidate| lowered.iter().position(|header| header == candidate))
}

/// Folds the many ways a variant is written down to `A`..`D`.
///
/// Accepts Latin letters, the first four Cyrillic letters in alphabet order (`А Б В Г`),
/// digits `1`..`4`, the Cyrillic `С` standing in for a Latin `C`, and an optional "variant"
/// word in front.
pub(crate) fn normalize_variant_label(raw: &str) -> Result<String, SpreadsheetError> {
    let unknown = || SpreadsheetError::UnknownVariant(raw.trim().to_string());
    let lowered = raw.trim().to_lowercase();

    let stripped = ["variant", "вариант", "var.", "вар.", "var", "вар"]
        .iter()
        .find_map(|prefix| lowered.strip_prefix(prefix))
        .unwrap_or(&lowered)
        .trim_matches(|ch: char| ch.is_whitespace() || ch == '-' || ch == '.' || ch == ':');

    let index = fold_symbol(stripped).ok_or_else(unknown)?;
    if index >= CANONICAL_VARIANTS {
        return Err(unknown());
    }
    OptionLetter::from_index(index).map(|letter| letter.as_char().to_string()).ok_or_else(unknown)
}

/// Reads a selected answer from a cell. Blank, `NaN` and `None` fold to no answer, as does
/// anything that is not a recognizable letter.
pub(crate) fn fold_letter(raw: &str) -> Option<OptionLetter> {
    let trimmed = raw.trim();
    if BLANK_CELLS.iter().any(|blank| trimmed.eq_ignore_ascii_case(blank)) {
        return None;
    }
    fold_symbol(&trimmed.to_lowercase()).and_then(OptionLetter::from_index)
}

fn fold_symbol(lowered: &str) -> Option<usize> {
    let lowered = lowered.strip_suffix(".0").unwrap_or(lowered);
    let mut chars = lowered.chars();
    let symbol = chars.next()?;
    if chars.next().is_some() {
        return None;
    }

    let upper = symbol.to_uppercase().next()?;
    if upper.is_ascii_uppercase() {
        let index = (upper as u8 - b'A') as usize;
        return (index < CYRILLIC_ORDINAL.len()).then_some(index);
    }
    if let Some(digit) = symbol.to_digit(10) {
        return (1..=CYRILLIC_ORDINAL.len() as u32).contains(&digit).then(|| digit as usize - 1);
    }
    if upper == CYRILLIC_ES {
        return Some(2);
    }
    CYRILLIC_ORDINAL.iter().position(|letter| *letter == upper)
}

/// Spreadsheets often turn `000123` into `123` or `123.0`.
pub(crate) fn clean_student_ref(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}

/// Forms a student reference may take in the roster: as written, without leading zeros, and
/// zero-padded to six digits.
pub(crate) fn student_ref_candidates(raw: &str) -> Vec<String> {
    let cleaned = clean_student_ref(raw);
    let mut candidates = vec![cleaned.clone()];
    let stripped = cleaned.trim_start_matches('0').to_string();
    if !stripped.is_empty() && !candidates.contains(&stripped) {
        candidates.push(stripped);
    }
    let padded = format!("{cleaned:0>6}");
    if !candidates.contains(&padded) {
        candidates.push(padded);
    }
    candidates
}
