//! Face annotation: box outline, 1-based index label, landmark dots.

use crate::types::FaceDetection;
use embedded_graphics::{
    draw_target::DrawTarget,
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use image::{Rgba, RgbaImage};
use std::convert::Infallible;

/// Box outline color (#FF2C35).
pub const RED: Rgb888 = Rgb888::new(0xFF, 0x2C, 0x35);
/// Label and landmark color (#32EEDB).
pub const GREEN: Rgb888 = Rgb888::new(0x32, 0xEE, 0xDB);

const BOX_STROKE_WIDTH: u32 = 1;
const LABEL_OFFSET_Y: f32 = 10.0;
const LANDMARK_RADIUS: u32 = 3;
/// Only the leading landmarks (eyes, nose, mouth, ears) are drawn.
pub const DRAWN_LANDMARKS: usize = 6;

/// Draw every face onto the context, in order.
pub fn annotate(context: &mut RgbaImage, faces: &[FaceDetection]) {
    let mut target = Target(context);

    for (i, face) in faces.iter().enumerate() {
        let corners = face.bbox.corners();
        let stroke = PrimitiveStyle::with_stroke(RED, BOX_STROKE_WIDTH);
        for (k, &start) in corners.iter().enumerate() {
            let end = corners[(k + 1) % corners.len()];
            infallible(
                Line::new(point(start.0, start.1), point(end.0, end.1))
                    .into_styled(stroke)
                    .draw(&mut target),
            );
        }

        let label = (i + 1).to_string();
        let text_style = TextStyleBuilder::new()
            .alignment(Alignment::Left)
            .baseline(Baseline::Alphabetic)
            .build();
        infallible(
            Text::with_text_style(
                &label,
                point(face.bbox.center_x(), face.bbox.y_min - LABEL_OFFSET_Y),
                MonoTextStyle::new(&FONT_10X20, GREEN),
                text_style,
            )
            .draw(&mut target),
        );

        let fill = PrimitiveStyle::with_fill(GREEN);
        for kp in face.keypoints.iter().take(DRAWN_LANDMARKS) {
            infallible(
                Circle::with_center(point(kp.x, kp.y), 2 * LANDMARK_RADIUS + 1)
                    .into_styled(fill)
                    .draw(&mut target),
            );
        }
    }
}

fn point(x: f32, y: f32) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}

fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

struct Target<'a>(&'a mut RgbaImage);

impl Dimensions for Target<'_> {
    fn bounding_box(&self) -> Rectangle {
        Rectangle {
            top_left: Point { x: 0, y: 0 },
            size: Size {
                width: self.0.width(),
                height: self.0.height(),
            },
        }
    }
}

impl DrawTarget for Target<'_> {
    type Color = Rgb888;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(at, color) in pixels {
            if at.x >= 0
                && (at.x as u32) < self.0.width()
                && at.y >= 0
                && (at.y as u32) < self.0.height()
            {
                self.0.put_pixel(
                    at.x as u32,
                    at.y as u32,
                    Rgba([color.r(), color.g(), color.b(), 255]),
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Keypoint};

    const BLANK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn rgba(c: Rgb888) -> Rgba<u8> {
        Rgba([c.r(), c.g(), c.b(), 255])
    }

    fn kp(x: f32, y: f32) -> Keypoint {
        Keypoint { x, y, name: None }
    }

    fn sample_faces() -> Vec<FaceDetection> {
        vec![
            FaceDetection::new(
                BoundingBox::new(40.0, 40.0, 100.0, 110.0),
                vec![
                    kp(55.0, 60.0),
                    kp(85.0, 60.0),
                    kp(70.0, 75.0),
                    kp(70.0, 90.0),
                    kp(50.0, 70.0),
                    kp(90.0, 70.0),
                    kp(150.0, 150.0), // beyond the drawn subset
                ],
                0.9,
            ),
            FaceDetection::new(BoundingBox::new(120.0, 60.0, 170.0, 120.0), vec![], 0.8),
        ]
    }

    fn blank(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, BLANK)
    }

    #[test]
    fn test_pixel_identical_on_fresh_canvases() {
        let faces = sample_faces();
        let mut a = blank(200, 200);
        let mut b = blank(200, 200);
        annotate(&mut a, &faces);
        annotate(&mut b, &faces);
        assert_eq!(a, b);
    }

    #[test]
    fn test_repeat_draw_is_idempotent() {
        let faces = sample_faces();
        let mut once = blank(200, 200);
        annotate(&mut once, &faces);
        let mut twice = once.clone();
        annotate(&mut twice, &faces);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_box_corners_are_red() {
        let mut img = blank(200, 200);
        annotate(&mut img, &sample_faces());
        assert_eq!(img.get_pixel(40, 40), &rgba(RED));
        assert_eq!(img.get_pixel(100, 110), &rgba(RED));
        assert_eq!(img.get_pixel(70, 40), &rgba(RED)); // top edge
        assert_eq!(img.get_pixel(40, 75), &rgba(RED)); // left edge
        // Interior away from landmarks stays untouched.
        assert_eq!(img.get_pixel(60, 100), &BLANK);
    }

    #[test]
    fn test_first_six_landmarks_drawn() {
        let mut img = blank(200, 200);
        annotate(&mut img, &sample_faces());
        for (x, y) in [(55, 60), (85, 60), (70, 75), (70, 90), (50, 70), (90, 70)] {
            assert_eq!(img.get_pixel(x, y), &rgba(GREEN), "landmark at ({x}, {y})");
        }
        // Radius 3: three pixels out is filled, five pixels out is not.
        assert_eq!(img.get_pixel(58, 60), &rgba(GREEN));
        assert_eq!(img.get_pixel(60, 60), &BLANK);
        // The seventh keypoint is not drawn.
        assert_eq!(img.get_pixel(150, 150), &BLANK);
    }

    #[test]
    fn test_index_label_above_box() {
        let mut img = blank(200, 200);
        annotate(&mut img, &sample_faces());
        // Label "1" sits between the font ascent and the baseline at y_min - 10 = 30.
        let label_green = (70..80)
            .flat_map(|x| (14..31).map(move |y| (x, y)))
            .any(|(x, y)| img.get_pixel(x, y) == &rgba(GREEN));
        assert!(label_green, "expected label pixels above the first box");
    }

    #[test]
    fn test_no_faces_leaves_canvas_untouched() {
        let mut img = blank(50, 50);
        annotate(&mut img, &[]);
        assert_eq!(img, blank(50, 50));
    }

    #[test]
    fn test_out_of_bounds_face_is_clipped() {
        let mut img = blank(20, 20);
        let face = FaceDetection::new(
            BoundingBox::new(-30.0, -30.0, 60.0, 60.0),
            vec![kp(-5.0, -5.0)],
            0.7,
        );
        annotate(&mut img, &[face]);
        assert_eq!(img, blank(20, 20));
    }
}
