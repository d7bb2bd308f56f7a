//! Optical recognition of one photographed answer sheet.
//!
//! Recognition runs in two steps so the caller can look up the booklet in between:
//! [`OpticalPipeline::decode`] reads the image and the identity marker, and
//! [`OpticalPipeline::read_answers`] rectifies the sheet and classifies every row. Both are
//! synchronous and CPU-bound; services run them on the blocking pool.

pub(crate) mod identity;
pub(crate) mod marks;
pub(crate) mod overlay;
pub(crate) mod rectify;
pub(crate) mod template;
#[cfg(test)]
pub(crate) mod testing;

use image::GrayImage;
use thiserror::Error;

use crate::engine::optical::identity::{
    IdentityDecoder, IdentityMarker, QrIdentityDecoder, SheetIdentity,
};
use crate::engine::optical::marks::{binarize, find_bubbles, read_rows, RowReading};
use crate::engine::optical::overlay::render_overlay;
use crate::engine::optical::rectify::rectify;
use crate::engine::optical::template::SheetTemplate;
use crate::engine::resolver::RawAnswers;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecognitionConfig {
    pub(crate) option_count: usize,
    pub(crate) min_ink_pixels: u32,
    pub(crate) bubble_min_px: u32,
    pub(crate) bubble_max_px: u32,
    pub(crate) aspect_tolerance: f32,
    pub(crate) threshold_radius: u32,
    pub(crate) threshold_offset: u8,
    /// Off by default: a double mark then resolves to the fuller bubble.
    pub(crate) double_mark_margin: Option<u32>,
    pub(crate) render_overlay: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            option_count: 4,
            min_ink_pixels: 550,
            bubble_min_px: 18,
            bubble_max_px: 60,
            aspect_tolerance: 0.15,
            threshold_radius: 15,
            threshold_offset: 10,
            double_mark_margin: None,
            render_overlay: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub(crate) enum ScanError {
    #[error("could not decode scan: {0}")]
    Decode(String),
    #[error("identity marker not found")]
    IdentityNotFound,
    #[error("scan references an unknown {0}")]
    ReferenceNotFound(String),
}

impl ScanError {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::IdentityNotFound => "identity_not_found",
            Self::ReferenceNotFound(_) => "reference_not_found",
        }
    }
}

/// A readable image whose identity marker decoded.
#[derive(Debug, Clone)]
pub(crate) struct DecodedSheet {
    image: GrayImage,
    marker: IdentityMarker,
    identity: SheetIdentity,
}

impl DecodedSheet {
    pub(crate) fn identity(&self) -> &SheetIdentity {
        &self.identity
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ScanReading {
    pub(crate) answers: RawAnswers,
    pub(crate) rows: Vec<RowReading>,
    /// Set when the sheet could not be rectified or cannot hold every position.
    pub(crate) low_confidence: bool,
    pub(crate) note: Option<String>,
    pub(crate) overlay: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub(crate) struct OpticalPipeline<D = QrIdentityDecoder> {
    decoder: D,
    config: RecognitionConfig,
}

impl<D: IdentityDecoder> OpticalPipeline<D> {
    pub(crate) fn new(decoder: D, config: RecognitionConfig) -> Self {
        Self { decoder, config }
    }

    pub(crate) fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    pub(crate) fn decode(&self, bytes: &[u8]) -> Result<DecodedSheet, ScanError> {
        let image = image::load_from_memory(bytes)
            .map_err(|err| ScanError::Decode(err.to_string()))?
            .to_luma8();
        let marker = self.decoder.decode(&image).ok_or(ScanError::IdentityNotFound)?;
        let identity = SheetIdentity::parse(&marker.payload)?;
        Ok(DecodedSheet { image, marker, identity })
    }

    /// Reads `positions` rows. Rows the sheet does not show are absent from the answers and
    /// grade as no answer; a booklet longer than one sheet is read as low confidence.
    pub(crate) fn read_answers(&self, sheet: &DecodedSheet, positions: usize) -> ScanReading {
        let template = SheetTemplate::new(self.config.option_count);
        let overflow = (positions > template.capacity()).then(|| {
            tracing::warn!(
                positions,
                capacity = template.capacity(),
                "booklet has more positions than one sheet prints"
            );
            format!(
                "booklet has {positions} positions but the sheet carries {}",
                template.capacity()
            )
        });

        let rectification = rectify(&sheet.image, &sheet.marker, &template);
        let binary = binarize(
            rectification.image(),
            self.config.threshold_radius,
            self.config.threshold_offset,
        );
        let bubbles = find_bubbles(&binary, &self.config, rectification.marker_zone());
        let rows = read_rows(&binary, &bubbles, &template, positions, &self.config);

        let answers: RawAnswers = rows.iter().map(|row| (row.position, row.selected())).collect();
        let overlay = if self.config.render_overlay {
            render_overlay(rectification.image(), &rows)
                .map_err(|err| tracing::warn!(error = %err, "failed to render scan overlay"))
                .ok()
        } else {
            None
        };

        tracing::debug!(
            bubbles = bubbles.len(),
            rows = rows.len(),
            answered = answers.answered(),
            rectified = rectification.is_rectified(),
            "scan read"
        );

        ScanReading {
            answers,
            rows,
            low_confidence: !rectification.is_rectified() || overflow.is_some(),
            note: rectification.reason().map(str::to_string).or(overflow),
            overlay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::answer_key::OptionLetter;
    use crate::engine::optical::marks::RowStatus;
    use crate::engine::optical::testing::{
        canonical_marker, draw_sheet, encode_png, tilt, StubDecoder,
    };

    const PAYLOAD: &str = r#"{"uid": "000123", "eid": "booklet-1", "v": "B"}"#;

    fn pipeline(
        marker: Option<IdentityMarker>,
        config: RecognitionConfig,
    ) -> OpticalPipeline<StubDecoder> {
        OpticalPipeline::new(StubDecoder { marker }, config)
    }

    fn quiet() -> RecognitionConfig {
        RecognitionConfig { render_overlay: false, ..RecognitionConfig::default() }
    }

    fn selections() -> Vec<Option<usize>> {
        vec![Some(0), Some(3), None, Some(1), Some(2), Some(2), None, Some(0)]
    }

    fn expected_answers(selections: &[Option<usize>]) -> RawAnswers {
        selections
            .iter()
            .enumerate()
            .map(|(index, pick)| (index as u32 + 1, pick.and_then(OptionLetter::from_index)))
            .collect()
    }

    #[test]
    fn reads_a_clean_sheet() {
        let template = SheetTemplate::new(4);
        let sheet = draw_sheet(&template, &selections(), true);
        let marker = canonical_marker(&template, PAYLOAD);
        let pipeline = pipeline(Some(marker), RecognitionConfig::default());

        let decoded = pipeline.decode(&encode_png(&sheet)).expect("decode");
        assert_eq!(decoded.identity().student_ref, "000123");
        assert_eq!(decoded.identity().booklet_id, "booklet-1");

        let reading = pipeline.read_answers(&decoded, selections().len());
        assert!(!reading.low_confidence, "{:?}", reading.note);
        assert_eq!(reading.rows.len(), selections().len());
        assert_eq!(reading.answers, expected_answers(&selections()));
        assert!(reading.overlay.as_ref().is_some_and(|png| png.starts_with(b"\x89PNG")));
    }

    #[test]
    fn missing_fiducials_fall_back_to_low_confidence() {
        let template = SheetTemplate::new(4);
        let sheet = draw_sheet(&template, &selections(), false);
        let pipeline = pipeline(Some(canonical_marker(&template, PAYLOAD)), quiet());

        let decoded = pipeline.decode(&encode_png(&sheet)).expect("decode");
        let reading = pipeline.read_answers(&decoded, selections().len());
        assert!(reading.low_confidence);
        assert!(reading.note.is_some());
        assert_eq!(reading.answers, expected_answers(&selections()));
    }

    #[test]
    fn tilted_photo_is_rectified() {
        let template = SheetTemplate::new(4);
        let sheet = draw_sheet(&template, &selections(), true);
        let (photo, map) = tilt(&sheet, 1.5, (60.0, 20.0), (1340, 1840));

        let canonical = canonical_marker(&template, PAYLOAD);
        let marker = IdentityMarker { corners: canonical.corners.map(&map), ..canonical };
        let pipeline = pipeline(Some(marker), quiet());

        let decoded = pipeline.decode(&encode_png(&photo)).expect("decode");
        let reading = pipeline.read_answers(&decoded, selections().len());
        assert!(!reading.low_confidence, "{:?}", reading.note);
        assert_eq!(reading.answers, expected_answers(&selections()));
    }

    #[test]
    fn second_column_positions_are_read() {
        let template = SheetTemplate::new(4);
        let picks: Vec<Option<usize>> = (0..30).map(|index| Some(index % 4)).collect();
        let sheet = draw_sheet(&template, &picks, true);
        let pipeline = pipeline(Some(canonical_marker(&template, PAYLOAD)), quiet());

        let decoded = pipeline.decode(&encode_png(&sheet)).expect("decode");
        let reading = pipeline.read_answers(&decoded, picks.len());
        assert_eq!(reading.rows.len(), 30);
        assert_eq!(reading.answers, expected_answers(&picks));
    }

    #[test]
    fn booklet_longer_than_the_sheet_is_low_confidence() {
        let template = SheetTemplate::new(4);
        let picks: Vec<Option<usize>> = (0..50).map(|index| Some(index % 4)).collect();
        let sheet = draw_sheet(&template, &picks, true);
        let pipeline = pipeline(Some(canonical_marker(&template, PAYLOAD)), quiet());
        let decoded = pipeline.decode(&encode_png(&sheet)).expect("decode");

        let fits = pipeline.read_answers(&decoded, 50);
        assert!(!fits.low_confidence, "{:?}", fits.note);

        let reading = pipeline.read_answers(&decoded, 60);
        assert!(reading.low_confidence);
        assert!(reading.note.as_deref().is_some_and(|note| note.contains("carries 50")));
        assert_eq!(reading.answers, fits.answers);
        assert_eq!(reading.answers.selected(51), None);
    }

    #[test]
    fn double_marks_follow_the_configured_margin() {
        let template = SheetTemplate::new(4);
        let mut sheet = draw_sheet(&template, &[Some(1)], true);
        let (x, y) = template.bubble_center(1, 2);
        let radius = template.bubble_radius().round() as i32;
        imageproc::drawing::draw_filled_circle_mut(
            &mut sheet,
            (x.round() as i32, y.round() as i32),
            radius,
            image::Luma([0]),
        );
        let png = encode_png(&sheet);
        let marker = canonical_marker(&template, PAYLOAD);

        let take_max = pipeline(Some(marker.clone()), quiet());
        let reading = take_max.read_answers(&take_max.decode(&png).unwrap(), 1);
        assert!(matches!(reading.rows[0].status, RowStatus::Selected(_)));

        let config = RecognitionConfig { double_mark_margin: Some(150), ..quiet() };
        let strict = pipeline(Some(marker), config);
        let reading = strict.read_answers(&strict.decode(&png).unwrap(), 1);
        assert_eq!(reading.rows[0].status, RowStatus::Ambiguous);
        assert_eq!(reading.answers.selected(1), None);
    }

    #[test]
    fn decode_failures_are_classified() {
        let template = SheetTemplate::new(4);
        let sheet = draw_sheet(&template, &[], true);

        let err = pipeline(None, quiet()).decode(b"not an image").unwrap_err();
        assert_eq!(err.kind(), "decode");

        let err = pipeline(None, quiet()).decode(&encode_png(&sheet)).unwrap_err();
        assert_eq!(err, ScanError::IdentityNotFound);

        let bad_payload = canonical_marker(&template, r#"{"uid": 5}"#);
        let err = pipeline(Some(bad_payload), quiet()).decode(&encode_png(&sheet)).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }
}
