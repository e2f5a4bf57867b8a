use image::{ Rgb, RgbImage };
use imageproc::{ drawing, rect::Rect };
use rusttype::{ point, Font, Scale };

use std::fs;
use std::path::Path;

use crate::error::{ LprError, LprErrorKind };

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 3;
const LABEL_PADDING: u32 = 5;

/// Draws plate boxes and, when a font is loaded, their labels.
pub struct Annotator {
    font: Option<Font<'static>>,
    scale: Scale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self { font: None, scale: Scale::uniform(24.0) }
    }
}

impl Annotator {

    pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, LprError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let font = Font::try_from_vec(data)
            .ok_or_else(|| LprError::from(LprErrorKind::InvalidFont(path.to_path_buf())))?;
        Ok(Self { font: Some(font), ..Self::default() })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// `rect` is x, y, width, height.
    pub fn draw(&self, image: &mut RgbImage, rect: [u32; 4], label: &str) {
        let [x, y, width, height] = rect;
        for i in 0..BOX_THICKNESS {
            if width <= 2 * i || height <= 2 * i {
                break;
            }
            let r = Rect::at((x + i) as i32, (y + i) as i32).of_size(width - 2 * i, height - 2 * i);
            drawing::draw_hollow_rect_mut(image, r, BOX_COLOR);
        }

        let font = match &self.font {
            Some(font) => font,
            None => return,
        };
        let text_width = text_width(font, self.scale, label);
        if text_width == 0 {
            return;
        }
        let text_height = self.scale.y.ceil() as u32;
        let top = y.saturating_sub(text_height + 2 * LABEL_PADDING);
        let background = Rect::at(x as i32, top as i32)
            .of_size(text_width + LABEL_PADDING, text_height + 2 * LABEL_PADDING);
        drawing::draw_filled_rect_mut(image, background, LABEL_BACKGROUND);
        drawing::draw_text_mut(image, LABEL_COLOR, x, top + LABEL_PADDING, self.scale, font, label);
    }
}

fn text_width(font: &Font, scale: Scale, text: &str) -> u32 {
    font.layout(text, scale, point(0.0, 0.0))
        .filter_map(|g| g.pixel_bounding_box())
        .map(|bb| bb.max.x)
        .max()
        .unwrap_or(0)
        .max(0) as u32
}
