use image::GrayImage;
use serde::Deserialize;
use serde_json::Value;

use crate::engine::optical::ScanError;

/// A decoded identity marker and where it was found, in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IdentityMarker {
    pub(crate) payload: String,
    pub(crate) corners: [(f32, f32); 4],
}

impl IdentityMarker {
    pub(crate) fn centroid(&self) -> (f32, f32) {
        let (sum_x, sum_y) =
            self.corners.iter().fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        (sum_x / 4.0, sum_y / 4.0)
    }

    /// `(min_x, min_y, max_x, max_y)`.
    pub(crate) fn bounds(&self) -> (f32, f32, f32, f32) {
        self.corners.iter().fold(
            (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), (x, y)| {
                (min_x.min(*x), min_y.min(*y), max_x.max(*x), max_y.max(*y))
            },
        )
    }

    /// Mean side length; the printed marker is a square.
    pub(crate) fn side(&self) -> f32 {
        let mut total = 0.0;
        for index in 0..4 {
            let (x1, y1) = self.corners[index];
            let (x2, y2) = self.corners[(index + 1) % 4];
            total += ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();
        }
        total / 4.0
    }
}

/// Finds and decodes the machine-readable identity marker anywhere in a frame.
pub(crate) trait IdentityDecoder: Send + Sync {
    fn decode(&self, image: &GrayImage) -> Option<IdentityMarker>;
}

/// QR codes through `rqrr`. The first grid that decodes wins.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct QrIdentityDecoder;

impl IdentityDecoder for QrIdentityDecoder {
    fn decode(&self, image: &GrayImage) -> Option<IdentityMarker> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            image.width() as usize,
            image.height() as usize,
            |x, y| image.get_pixel(x as u32, y as u32)[0],
        );

        prepared.detect_grids().into_iter().find_map(|grid| {
            let (_, payload) = grid.decode().ok()?;
            let corners = grid.bounds.map(|point| (point.x as f32, point.y as f32));
            Some(IdentityMarker { payload, corners })
        })
    }
}

/// Who filled the sheet and which booklet they were given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SheetIdentity {
    pub(crate) student_ref: String,
    pub(crate) booklet_id: String,
    pub(crate) variant: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdentityPayload {
    #[serde(alias = "studentRef", alias = "uid")]
    student_ref: Option<Value>,
    #[serde(alias = "bookletId", alias = "eid")]
    booklet_id: Option<Value>,
    #[serde(alias = "v")]
    variant: Option<Value>,
}

impl SheetIdentity {
    /// Reads `{studentRef|uid, bookletId|eid, variant|v}`; values may be strings or numbers.
    pub(crate) fn parse(payload: &str) -> Result<Self, ScanError> {
        let raw: IdentityPayload = serde_json::from_str(payload.trim())
            .map_err(|err| ScanError::Decode(format!("identity payload is not json: {err}")))?;

        let student_ref = raw
            .student_ref
            .as_ref()
            .and_then(scalar)
            .ok_or_else(|| ScanError::Decode("identity payload has no studentRef".to_string()))?;
        let booklet_id = raw
            .booklet_id
            .as_ref()
            .and_then(scalar)
            .ok_or_else(|| ScanError::Decode("identity payload has no bookletId".to_string()))?;

        Ok(Self { student_ref, booklet_id, variant: raw.variant.as_ref().and_then(scalar) })
    }
}

fn scalar(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
