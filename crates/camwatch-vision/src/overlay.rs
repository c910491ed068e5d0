//! Detection overlay painted on a transparent surface aligned with the frame.

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{imageops, Rgba, RgbaImage, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, Blend};
use imageproc::rect::Rect;
use std::path::Path;

use crate::{BoundingBox, Detection};

pub const PERSON_COLOR: Rgba<u8> = Rgba([0xFF, 0x0F, 0x0F, 0xFF]);
pub const OBJECT_COLOR: Rgba<u8> = Rgba([0x00, 0xB6, 0x12, 0xFF]);
pub const LABEL_COLOR: Rgba<u8> = Rgba([0x00, 0x00, 0x00, 0xFF]);

const FILL_ALPHA: f32 = 0.4;
const LABEL_DX: f32 = 10.0;
const LABEL_DY: f32 = 20.0;

/// Minimal 2D drawing target.
pub trait Surface {
    fn resize(&mut self, width: u32, height: u32);
    fn width(&self) -> u32;
    fn clear(&mut self);
    fn fill_rect(&mut self, rect: BoundingBox, color: Rgba<u8>);
    /// `(x, y)` is the text baseline origin.
    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>);
}

pub fn color_for(det: &Detection) -> Rgba<u8> {
    if det.is_person() { PERSON_COLOR } else { OBJECT_COLOR }
}

pub fn label_for(det: &Detection) -> String {
    format!("{} {}%", det.class, (det.confidence.clamp(0.0, 1.0) * 100.0).round() as u32)
}

/// Where a detection's box lands on a canvas `canvas_width` wide.
pub fn placed_box(det: &Detection, canvas_width: u32, mirrored: bool) -> BoundingBox {
    if mirrored { det.bbox.mirrored(canvas_width as f32) } else { det.bbox }
}

/// Clear the surface and paint every detection. Keeps no state between calls.
pub fn render<S: Surface + ?Sized>(surface: &mut S, detections: &[Detection], mirrored: bool) {
    surface.clear();
    let width = surface.width();

    for det in detections {
        let b = placed_box(det, width, mirrored);
        let mut fill = color_for(det);
        fill.0[3] = (FILL_ALPHA * 255.0).round() as u8;
        surface.fill_rect(b, fill);
        surface.fill_text(&label_for(det), b.x + LABEL_DX, b.y + LABEL_DY, LABEL_COLOR);
    }
}

/// RGBA raster surface. Labels are only rasterised when a font is loaded.
pub struct RasterSurface {
    canvas: Blend<RgbaImage>,
    font: Option<FontArc>,
    label_px: f32,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self { canvas: Blend(RgbaImage::new(width, height)), font: None, label_px: 12.0 }
    }

    pub fn with_font_file(mut self, path: &Path, label_px: f32) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes).with_context(|| format!("parse font {}", path.display()))?;
        self.font = Some(font);
        self.label_px = label_px;
        Ok(self)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.canvas.0
    }
}

impl Surface for RasterSurface {
    fn resize(&mut self, width: u32, height: u32) {
        if self.canvas.0.dimensions() != (width, height) {
            self.canvas = Blend(RgbaImage::new(width, height));
        }
    }

    fn width(&self) -> u32 {
        self.canvas.0.width()
    }

    fn clear(&mut self) {
        for p in self.canvas.0.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    fn fill_rect(&mut self, rect: BoundingBox, color: Rgba<u8>) {
        let w = rect.width.round().max(1.0) as u32;
        let h = rect.height.round().max(1.0) as u32;
        let r = Rect::at(rect.x.round() as i32, rect.y.round() as i32).of_size(w, h);
        draw_filled_rect_mut(&mut self.canvas, r, color);
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>) {
        let Some(font) = &self.font else { return; };
        let top = (y - self.label_px).round() as i32;
        draw_text_mut(&mut self.canvas, color, x.round() as i32, top, PxScale::from(self.label_px), font, text);
    }
}

/// Blend the overlay onto the frame as the viewer would see it.
pub fn compose(frame: &RgbImage, overlay: &RgbaImage, mirrored: bool) -> RgbaImage {
    let mut base = image::DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
    if mirrored {
        imageops::flip_horizontal_in_place(&mut base);
    }
    imageops::overlay(&mut base, overlay, 0, 0);
    base
}
