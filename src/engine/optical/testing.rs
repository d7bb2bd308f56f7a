//! Synthetic answer sheets for recognition tests.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::rect::Rect;

use crate::engine::optical::identity::{IdentityDecoder, IdentityMarker};
use crate::engine::optical::template::{
    ReferenceRole, SheetTemplate, CANONICAL_HEIGHT, CANONICAL_WIDTH,
};

/// Reports a fixed marker wherever the test says it was printed.
#[derive(Debug, Clone)]
pub(crate) struct StubDecoder {
    pub(crate) marker: Option<IdentityMarker>,
}

impl IdentityDecoder for StubDecoder {
    fn decode(&self, _image: &GrayImage) -> Option<IdentityMarker> {
        self.marker.clone()
    }
}

pub(crate) fn canonical_marker(template: &SheetTemplate, payload: &str) -> IdentityMarker {
    let (min_x, min_y, max_x, max_y) = template.marker_bounds();
    IdentityMarker {
        payload: payload.to_string(),
        corners: [(min_x, min_y), (max_x, min_y), (max_x, max_y), (min_x, max_y)],
    }
}

/// A clean sheet in canonical space. `selections[i]` is the option index filled at position
/// `i + 1`.
pub(crate) fn draw_sheet(
    template: &SheetTemplate,
    selections: &[Option<usize>],
    with_fiducials: bool,
) -> GrayImage {
    let mut sheet = GrayImage::from_pixel(CANONICAL_WIDTH, CANONICAL_HEIGHT, Luma([255]));

    if with_fiducials {
        let side = template.anchor_side().round() as u32;
        for role in ReferenceRole::FIDUCIALS {
            let (x, y) = template.reference_point(role);
            let left = (x - side as f32 / 2.0).round() as i32;
            let top = (y - side as f32 / 2.0).round() as i32;
            draw_filled_rect_mut(&mut sheet, Rect::at(left, top).of_size(side, side), Luma([0]));
        }
    }

    let radius = template.bubble_radius().round() as i32;
    for (index, selection) in selections.iter().enumerate() {
        let position = index as u32 + 1;
        for option in 0..template.option_count() {
            let (x, y) = template.bubble_center(position, option);
            let center = (x.round() as i32, y.round() as i32);
            draw_hollow_circle_mut(&mut sheet, center, radius, Luma([0]));
            draw_hollow_circle_mut(&mut sheet, center, radius - 1, Luma([0]));
            if *selection == Some(option) {
                draw_filled_circle_mut(&mut sheet, center, radius, Luma([0]));
            }
        }
    }
    sheet
}

/// Rotates by `degrees` about the origin and shifts, onto a larger white canvas.
pub(crate) fn tilt(
    sheet: &GrayImage,
    degrees: f32,
    shift: (f32, f32),
    canvas: (u32, u32),
) -> (GrayImage, impl Fn((f32, f32)) -> (f32, f32)) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let map = move |(x, y): (f32, f32)| (x * cos - y * sin + shift.0, x * sin + y * cos + shift.1);

    let (w, h) = (sheet.width() as f32, sheet.height() as f32);
    let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let projection = Projection::from_control_points(corners, corners.map(map))
        .expect("rigid motion is invertible");

    let mut out = GrayImage::from_pixel(canvas.0, canvas.1, Luma([255]));
    warp_into(sheet, &projection, Interpolation::Bilinear, Luma([255]), &mut out);
    (out, map)
}

pub(crate) fn encode_png(image: &GrayImage) -> Vec<u8> {
    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image.clone())
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .expect("encode png");
    png
}
