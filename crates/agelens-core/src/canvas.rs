//! Drawing surface shared by capture, detection and annotation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// RGBA raster with an optional drawing context.
pub struct Canvas {
    pixels: RgbaImage,
    attached: bool,
}

impl Canvas {
    /// An empty canvas with a drawing context.
    pub fn new() -> Self {
        Self {
            pixels: RgbaImage::new(0, 0),
            attached: true,
        }
    }

    /// A canvas that never yields a drawing context (headless / torn down).
    pub fn detached() -> Self {
        Self {
            pixels: RgbaImage::new(0, 0),
            attached: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn context(&self) -> Option<&RgbaImage> {
        self.attached.then_some(&self.pixels)
    }

    pub fn context_mut(&mut self) -> Option<&mut RgbaImage> {
        if self.attached {
            Some(&mut self.pixels)
        } else {
            None
        }
    }

    /// Resize the canvas to the frame and copy the frame onto it.
    pub fn draw_image(&mut self, frame: &RgbaImage) {
        if self.attached {
            self.pixels = frame.clone();
        }
    }

    /// PNG snapshot of the canvas as a base64 data URL.
    pub fn to_data_url(&self) -> Result<String, image::ImageError> {
        let mut png = Cursor::new(Vec::new());
        self.pixels.write_to(&mut png, ImageFormat::Png)?;
        Ok(format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(png.get_ref())))
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a PNG data URL produced by [`Canvas::to_data_url`].
pub fn decode_data_url(url: &str) -> Option<RgbaImage> {
    let payload = url.strip_prefix(PNG_DATA_URL_PREFIX)?;
    let bytes = STANDARD.decode(payload).ok()?;
    image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .ok()
        .map(|img| img.to_rgba8())
}
