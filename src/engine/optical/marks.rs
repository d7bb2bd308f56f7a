//! Bubble detection and fill classification on a canonical sheet.

use std::cmp::Ordering;
use std::collections::HashSet;

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::filter::{box_filter, gaussian_blur_f32};
use serde::Serialize;

use crate::engine::answer_key::OptionLetter;
use crate::engine::optical::rectify::Zone;
use crate::engine::optical::template::SheetTemplate;
use crate::engine::optical::RecognitionConfig;

const BLUR_SIGMA: f32 = 1.0;
/// Pixels this dark are ink whatever their neighbourhood looks like.
const SOLID_INK: u8 = 40;
/// Square fiducials fill their box; round bubbles cannot pass this.
const MAX_BUBBLE_SOLIDITY: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct BubbleBox {
    pub(crate) left: u32,
    pub(crate) top: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl BubbleBox {
    pub(crate) fn center(&self) -> (f32, f32) {
        (
            self.left as f32 + self.width as f32 / 2.0,
            self.top as f32 + self.height as f32 / 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "letter", rename_all = "lowercase")]
pub(crate) enum RowStatus {
    Selected(OptionLetter),
    Blank,
    /// Two options carry comparable ink; graded as no answer.
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct RowReading {
    pub(crate) position: u32,
    pub(crate) bubbles: Vec<BubbleBox>,
    pub(crate) ink: Vec<u32>,
    pub(crate) status: RowStatus,
}

impl RowReading {
    pub(crate) fn selected(&self) -> Option<OptionLetter> {
        match self.status {
            RowStatus::Selected(letter) => Some(letter),
            RowStatus::Blank | RowStatus::Ambiguous => None,
        }
    }
}

/// Adaptive mean threshold. Ink becomes 255, paper 0.
pub(crate) fn binarize(gray: &GrayImage, radius: u32, offset: u8) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, BLUR_SIGMA);
    let local_mean = box_filter(&blurred, radius, radius);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = blurred.get_pixel(x, y)[0];
        let mean = local_mean.get_pixel(x, y)[0];
        if value <= SOLID_INK || u16::from(value) + u16::from(offset) < u16::from(mean) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Outer contours shaped like a printed bubble, outside the identity marker and not nested
/// inside another bubble.
pub(crate) fn find_bubbles(
    binary: &GrayImage,
    config: &RecognitionConfig,
    exclusion: Zone,
) -> Vec<BubbleBox> {
    let contours = find_contours::<i32>(binary);
    let mut candidates: Vec<(usize, BubbleBox)> = Vec::new();

    for (index, contour) in contours.iter().enumerate() {
        if contour.border_type != BorderType::Outer || contour.points.is_empty() {
            continue;
        }
        let (left, top, right, bottom) = contour.points.iter().fold(
            (i32::MAX, i32::MAX, i32::MIN, i32::MIN),
            |(l, t, r, b), point| (l.min(point.x), t.min(point.y), r.max(point.x), b.max(point.y)),
        );
        let bubble = BubbleBox {
            left: left.max(0) as u32,
            top: top.max(0) as u32,
            width: (right - left + 1) as u32,
            height: (bottom - top + 1) as u32,
        };

        let size_ok = |side: u32| side >= config.bubble_min_px && side <= config.bubble_max_px;
        if !size_ok(bubble.width) || !size_ok(bubble.height) {
            continue;
        }
        let aspect = bubble.width as f32 / bubble.height as f32;
        if (aspect - 1.0).abs() > config.aspect_tolerance {
            continue;
        }
        let (cx, cy) = bubble.center();
        let (min_x, min_y, max_x, max_y) = exclusion;
        if cx >= min_x && cx <= max_x && cy >= min_y && cy <= max_y {
            continue;
        }
        let area = (bubble.width * bubble.height) as f32;
        if box_ink(binary, &bubble) as f32 > MAX_BUBBLE_SOLIDITY * area {
            continue;
        }
        candidates.push((index, bubble));
    }

    let candidate_ids: HashSet<usize> = candidates.iter().map(|(index, _)| *index).collect();
    candidates
        .into_iter()
        .filter(|(index, _)| {
            let mut parent = contours[*index].parent;
            while let Some(ancestor) = parent {
                if candidate_ids.contains(&ancestor) {
                    return false;
                }
                parent = contours[ancestor].parent;
            }
            true
        })
        .map(|(_, bubble)| bubble)
        .collect()
}

/// Groups bubbles into rows and classifies each row.
///
/// Bubbles are split into the template's columns, sorted top to bottom, trimmed to the last
/// `rows x options` (header noise sits above the grid), cut into rows of exactly `options`
/// and each row sorted left to right. A row's ordinal in its column is its booklet position.
pub(crate) fn read_rows(
    binary: &GrayImage,
    bubbles: &[BubbleBox],
    template: &SheetTemplate,
    positions: usize,
    config: &RecognitionConfig,
) -> Vec<RowReading> {
    let options = template.option_count();
    let mut columns: Vec<Vec<BubbleBox>> = vec![Vec::new(); template.columns()];
    for bubble in bubbles {
        columns[template.column_of(bubble.center().0)].push(*bubble);
    }

    let mut rows = Vec::new();
    for (column, mut members) in columns.into_iter().enumerate() {
        let expected_rows = positions
            .saturating_sub(column * template.rows_per_column())
            .min(template.rows_per_column());
        if expected_rows == 0 {
            continue;
        }

        members.sort_by(|a, b| {
            by_axis(a.center().1, b.center().1).then(by_axis(a.center().0, b.center().0))
        });
        let expected = expected_rows * options;
        if members.len() > expected {
            members.drain(..members.len() - expected);
        }

        for (row, chunk) in members.chunks_exact(options).enumerate() {
            let mut row_bubbles = chunk.to_vec();
            row_bubbles.sort_by(|a, b| by_axis(a.center().0, b.center().0));
            let ink: Vec<u32> =
                row_bubbles.iter().map(|bubble| ellipse_ink(binary, bubble)).collect();
            let status = classify(&ink, config.min_ink_pixels, config.double_mark_margin);
            rows.push(RowReading {
                position: template.position(column, row),
                bubbles: row_bubbles,
                ink,
                status,
            });
        }
    }
    rows
}

/// The fullest bubble wins when its ink clears `min_ink`. With a margin, a runner-up within
/// `margin` pixels makes the row ambiguous.
pub(crate) fn classify(ink: &[u32], min_ink: u32, margin: Option<u32>) -> RowStatus {
    let Some((best_index, best)) = ink
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, u32)>, (index, count)| match best {
            Some((_, top)) if top >= count => best,
            _ => Some((index, count)),
        })
    else {
        return RowStatus::Blank;
    };
    if best <= min_ink {
        return RowStatus::Blank;
    }

    if let Some(margin) = margin {
        let runner_up = ink
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != best_index)
            .map(|(_, count)| *count)
            .max()
            .unwrap_or(0);
        if best - runner_up <= margin {
            return RowStatus::Ambiguous;
        }
    }

    OptionLetter::from_index(best_index).map_or(RowStatus::Blank, RowStatus::Selected)
}

fn by_axis(a: f32, b: f32) -> Ordering {
    a.total_cmp(&b)
}

fn box_ink(binary: &GrayImage, bubble: &BubbleBox) -> u32 {
    let mut ink = 0;
    for y in bubble.top..(bubble.top + bubble.height).min(binary.height()) {
        for x in bubble.left..(bubble.left + bubble.width).min(binary.width()) {
            if binary.get_pixel(x, y)[0] > 0 {
                ink += 1;
            }
        }
    }
    ink
}

/// Ink inside the ellipse inscribed in the bubble's box.
pub(crate) fn ellipse_ink(binary: &GrayImage, bubble: &BubbleBox) -> u32 {
    let (cx, cy) = bubble.center();
    let rx = bubble.width as f32 / 2.0;
    let ry = bubble.height as f32 / 2.0;
    let mut ink = 0;
    for y in bubble.top..(bubble.top + bubble.height).min(binary.height()) {
        for x in bubble.left..(bubble.left + bubble.width).min(binary.width()) {
            let dx = (x as f32 + 0.5 - cx) / rx;
            let dy = (y as f32 + 0.5 - cy) / ry;
            if dx * dx + dy * dy <= 1.0 && binary.get_pixel(x, y)[0] > 0 {
                ink += 1;
            }
        }
    }
    ink
}
