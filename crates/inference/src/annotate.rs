use crate::types::{Detection, DetectionBatch};
use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
];

const LINE_WIDTH: u32 = 2;
const LABEL_SCALE: f32 = 16.0;
const LABEL_PADDING: u32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Draws detections onto frames.
///
/// Boxes are always drawn. A `"<class> <score>"` tab above each box needs a
/// font, which the caller supplies as a TrueType/OpenType file.
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file(path: &Path) -> anyhow::Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("Failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(data)
            .with_context(|| format!("Not a usable font: {}", path.display()))?;
        Ok(Self { font: Some(font) })
    }

    pub fn draw(&self, image: &mut RgbImage, batch: &DetectionBatch) {
        for detection in batch.detections() {
            draw_box(image, detection);
            if let Some(font) = &self.font {
                draw_label(image, detection, font);
            }
        }
    }
}

fn draw_box(image: &mut RgbImage, detection: &Detection) {
    let bbox = &detection.bbox;
    let width = bbox.width().round() as u32;
    let height = bbox.height().round() as u32;
    if width == 0 || height == 0 {
        return;
    }

    let color = class_color(detection.class_id);
    let x = bbox.x1.round() as i32;
    let y = bbox.y1.round() as i32;

    for inset in 0..LINE_WIDTH {
        let w = width.saturating_sub(inset * 2);
        let h = height.saturating_sub(inset * 2);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(w, h);
        draw_hollow_rect_mut(image, rect, color);
    }
}

fn draw_label(image: &mut RgbImage, detection: &Detection, font: &FontArc) {
    let text = format!("{} {:.2}", detection.class_name, detection.confidence);
    let scale = PxScale::from(LABEL_SCALE);
    let (text_width, text_height) = text_size(scale, font, &text);

    let tab_height = text_height + LABEL_PADDING * 2;
    let x = detection.bbox.x1.round().max(0.0) as i32;
    // Above the box, or inside it when the box touches the top edge
    let top = detection.bbox.y1.round() as i32 - tab_height as i32;
    let y = if top < 0 {
        detection.bbox.y1.round().max(0.0) as i32
    } else {
        top
    };

    let tab = Rect::at(x, y).of_size(text_width + LABEL_PADDING * 2, tab_height);
    draw_filled_rect_mut(image, tab, class_color(detection.class_id));
    draw_text_mut(
        image,
        LABEL_TEXT_COLOR,
        x + LABEL_PADDING as i32,
        y + LABEL_PADDING as i32,
        scale,
        font,
        &text,
    );
}
