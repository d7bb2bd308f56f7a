pub(crate) mod answer_keys;
pub(crate) mod booklet_generation;
pub(crate) mod booklet_preview;
pub(crate) mod grading_store;
pub(crate) mod scan_grading;
pub(crate) mod section_validation;
pub(crate) mod spreadsheet_grading;
