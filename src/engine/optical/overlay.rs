use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::engine::optical::marks::{BubbleBox, RowReading, RowStatus};

const ACCEPTED: Rgb<u8> = Rgb([0, 200, 0]);
const BLANK: Rgb<u8> = Rgb([220, 0, 0]);
const AMBIGUOUS: Rgb<u8> = Rgb([255, 140, 0]);
const RING_WIDTH: i32 = 4;

/// Diagnostic PNG: a thick green ring on each accepted mark, thin red boxes around rows read
/// as blank and orange boxes around ambiguous rows.
pub(crate) fn render_overlay(
    image: &GrayImage,
    rows: &[RowReading],
) -> Result<Vec<u8>, image::ImageError> {
    let mut canvas: RgbImage = DynamicImage::ImageLuma8(image.clone()).to_rgb8();

    for row in rows {
        match row.status {
            RowStatus::Selected(letter) => {
                if let Some(bubble) = row.bubbles.get(letter.index()) {
                    ring(&mut canvas, bubble, ACCEPTED);
                }
            }
            RowStatus::Blank => outline(&mut canvas, &row.bubbles, BLANK),
            RowStatus::Ambiguous => outline(&mut canvas, &row.bubbles, AMBIGUOUS),
        }
    }

    let mut png = Vec::new();
    DynamicImage::ImageRgb8(canvas).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

fn ring(canvas: &mut RgbImage, bubble: &BubbleBox, color: Rgb<u8>) {
    let (cx, cy) = bubble.center();
    let radius = (bubble.width.max(bubble.height) / 2) as i32 + 2;
    for offset in 0..RING_WIDTH {
        draw_hollow_circle_mut(canvas, (cx as i32, cy as i32), radius + offset, color);
    }
}

fn outline(canvas: &mut RgbImage, bubbles: &[BubbleBox], color: Rgb<u8>) {
    for bubble in bubbles {
        let rect = Rect::at(bubble.left as i32 - 2, bubble.top as i32 - 2)
            .of_size(bubble.width + 4, bubble.height + 4);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::engine::answer_key::OptionLetter;

    #[test]
    fn overlay_is_a_png_with_colored_marks() {
        let image = GrayImage::from_pixel(120, 60, Luma([255]));
        let bubble = |left| BubbleBox { left, top: 15, width: 30, height: 30 };
        let rows = vec![RowReading {
            position: 1,
            bubbles: vec![bubble(10), bubble(60)],
            ink: vec![0, 900],
            status: RowStatus::Selected(OptionLetter::from_index(1).unwrap()),
        }];

        let png = render_overlay(&image, &rows).expect("png");
        assert_eq!(&png[1..4], b"PNG");

        let decoded = image::load_from_memory(&png).expect("decode").to_rgb8();
        let (cx, cy) = bubble(60).center();
        assert_eq!(*decoded.get_pixel(cx as u32 + 17, cy as u32), ACCEPTED);
        assert_eq!(*decoded.get_pixel(25, 30), Rgb([255, 255, 255]));
    }
}
