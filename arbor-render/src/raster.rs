//! Off-screen RGBA canvas that render types paint into before upload.
//!
//! The canvas is always square.  A node's box is stretched to fill it
//! (non-uniform scale), so drawing happens in box-local units and the
//! instanced quad stretches it back at draw time.

use arbor_core::BoundingBox;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Square RGBA8 canvas with a box-local → pixel scale.
pub struct RasterCanvas {
    image: RgbaImage,
    scale_x: f32,
    scale_y: f32,
}

impl RasterCanvas {
    /// Canvas of `size × size` pixels scaled so that `bb` fills it.
    pub fn for_box(size: u32, bb: &BoundingBox) -> Self {
        let size = size.max(1);
        Self {
            image: RgbaImage::new(size, size),
            scale_x: size as f32 / bb.w.max(f32::EPSILON),
            scale_y: size as f32 / bb.h.max(f32::EPSILON),
        }
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }

    pub fn scale(&self) -> (f32, f32) {
        (self.scale_x, self.scale_y)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    pub fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: [f32; 4]) {
        let Some((x0, y0, x1, y1)) = self.pixel_span(x, y, w, h) else {
            return;
        };
        for py in y0..y1 {
            for px in x0..x1 {
                self.blend(px, py, color);
            }
        }
    }

    /// Ellipse inscribed in the given box.
    pub fn fill_ellipse(&mut self, x: f32, y: f32, w: f32, h: f32, color: [f32; 4]) {
        let Some((x0, y0, x1, y1)) = self.pixel_span(x, y, w, h) else {
            return;
        };
        let cx = (x + w / 2.0) * self.scale_x;
        let cy = (y + h / 2.0) * self.scale_y;
        let rx = (w / 2.0 * self.scale_x).max(f32::EPSILON);
        let ry = (h / 2.0 * self.scale_y).max(f32::EPSILON);

        for py in y0..y1 {
            for px in x0..x1 {
                let dx = (px as f32 + 0.5 - cx) / rx;
                let dy = (py as f32 + 0.5 - cy) / ry;
                if dx * dx + dy * dy <= 1.0 {
                    self.blend(px, py, color);
                }
            }
        }
    }

    /// Border of `width` box-local units drawn inside the rectangle.
    pub fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, width: f32, color: [f32; 4]) {
        let width = width.min(w / 2.0).min(h / 2.0);
        self.fill_rect(x, y, w, width, color);
        self.fill_rect(x, y + h - width, w, width, color);
        self.fill_rect(x, y + width, width, h - 2.0 * width, color);
        self.fill_rect(x + w - width, y + width, width, h - 2.0 * width, color);
    }

    /// Full mip pyramid, base level first.
    pub fn into_mip_chain(self) -> MipChain {
        MipChain::from_base(self.image)
    }

    /// Pixel rectangle whose centres fall inside the box, clamped to the canvas.
    fn pixel_span(&self, x: f32, y: f32, w: f32, h: f32) -> Option<(u32, u32, u32, u32)> {
        let size = self.image.width() as f32;
        let x0 = (x * self.scale_x).round().clamp(0.0, size) as u32;
        let y0 = (y * self.scale_y).round().clamp(0.0, size) as u32;
        let x1 = ((x + w) * self.scale_x).round().clamp(0.0, size) as u32;
        let y1 = ((y + h) * self.scale_y).round().clamp(0.0, size) as u32;
        (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
    }

    /// Source-over with straight (non-premultiplied) alpha.
    fn blend(&mut self, px: u32, py: u32, color: [f32; 4]) {
        let dst = self.image.get_pixel(px, py).0;
        let sa = color[3].clamp(0.0, 1.0);
        let da = dst[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);

        let mut out = [0u8; 4];
        if out_a > 0.0 {
            for c in 0..3 {
                let s = color[c].clamp(0.0, 1.0);
                let d = dst[c] as f32 / 255.0;
                let v = (s * sa + d * da * (1.0 - sa)) / out_a;
                out[c] = (v * 255.0).round() as u8;
            }
            out[3] = (out_a * 255.0).round() as u8;
        }
        self.image.put_pixel(px, py, Rgba(out));
    }
}

/// Texture levels ready for upload, level 0 first, down to 1×1.
pub struct MipChain {
    levels: Vec<RgbaImage>,
}

impl MipChain {
    pub fn from_base(base: RgbaImage) -> Self {
        let mut levels = vec![base];
        loop {
            let Some(prev) = levels.last() else { break };
            let (w, h) = prev.dimensions();
            if w <= 1 && h <= 1 {
                break;
            }
            let next = imageops::resize(prev, (w / 2).max(1), (h / 2).max(1), FilterType::Triangle);
            levels.push(next);
        }
        Self { levels }
    }

    /// Width and height of level 0.
    pub fn size(&self) -> (u32, u32) {
        self.levels
            .first()
            .map(|l| l.dimensions())
            .unwrap_or((0, 0))
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn levels(&self) -> &[RgbaImage] {
        &self.levels
    }
}
