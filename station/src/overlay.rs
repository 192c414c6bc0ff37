//! Overlay renderer for active detections.
//!
//! Each accepted detection is shown as a colored box with a label tag and
//! fades out linearly over its last second on screen. The canvas is a
//! transparent RGBA image sized to the source frame.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, Blend};
use imageproc::rect::Rect;
use station_shared::{Detection, WasteCategory};
use tokio::time::Instant;

use crate::detection::Classified;
use crate::stream::Frame;

const BOX_THICKNESS: u32 = 3;
const TAG_HEIGHT: u32 = 18;
/// Approximate advance per label character
const TAG_CHAR_WIDTH: u32 = 8;
const TAG_PADDING: u32 = 8;
const FADE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveDetection {
    pub detection: Detection,
    pub category: WasteCategory,
    pub created_at: Instant,
    pub color: [u8; 3],
    pub display_name: &'static str,
}

impl ActiveDetection {
    pub fn new(classified: Classified, created_at: Instant) -> Self {
        Self {
            color: classified.category.rgb(),
            display_name: classified.category.display_name(),
            category: classified.category,
            detection: classified.detection,
            created_at,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.created_at)
    }

    pub fn is_expired(&self, now: Instant, display_time: Duration) -> bool {
        self.age(now) >= display_time
    }

    /// Linear fade over the final second, clamped to 0..=1.
    pub fn opacity(&self, now: Instant, display_time: Duration) -> f32 {
        let remaining = display_time.as_secs_f32() - self.age(now).as_secs_f32();
        (remaining / FADE.as_secs_f32()).clamp(0.0, 1.0)
    }

    fn label(&self) -> String {
        format!(
            "{} {:.0}%",
            self.display_name,
            self.detection.confidence * 100.0
        )
    }
}

#[derive(Debug)]
pub struct OverlayRenderer {
    display_time: Duration,
    active: Vec<ActiveDetection>,
    canvas: RgbaImage,
}

impl OverlayRenderer {
    pub fn new(display_time: Duration) -> Self {
        Self {
            display_time,
            active: Vec::new(),
            canvas: RgbaImage::new(1, 1),
        }
    }

    pub fn add(&mut self, detections: impl IntoIterator<Item = Classified>, now: Instant) {
        self.active
            .extend(detections.into_iter().map(|c| ActiveDetection::new(c, now)));
    }

    /// Detections still on screen at `now`.
    pub fn visible(&self, now: Instant) -> impl Iterator<Item = &ActiveDetection> {
        self.active
            .iter()
            .filter(move |d| !d.is_expired(now, self.display_time))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.active.len();
        let display_time = self.display_time;
        self.active.retain(|d| !d.is_expired(now, display_time));
        before - self.active.len()
    }

    /// Forget all detections and blank the canvas.
    pub fn clear(&mut self) {
        self.active.clear();
        self.canvas.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Repaint the canvas for a frame of the given size.
    pub fn render(&mut self, now: Instant, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if self.canvas.dimensions() != (width, height) {
            self.canvas = RgbaImage::new(width, height);
        } else {
            self.canvas.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
        }

        let display_time = self.display_time;
        let mut canvas = Blend(std::mem::replace(&mut self.canvas, RgbaImage::new(0, 0)));
        for active in self.active.iter().filter(|d| !d.is_expired(now, display_time)) {
            let alpha = (active.opacity(now, display_time) * 255.0).round() as u8;
            if alpha == 0 {
                continue;
            }
            draw_detection(&mut canvas, active, alpha);
        }
        self.canvas = canvas.0;
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::new());
        self.canvas.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    /// Composite the current canvas over a camera frame and encode as JPEG.
    pub fn composite(&self, frame: &Frame) -> Result<Bytes, image::ImageError> {
        let mut base =
            image::load_from_memory_with_format(&frame.jpeg, ImageFormat::Jpeg)?.to_rgba8();
        if base.dimensions() == self.canvas.dimensions() {
            image::imageops::overlay(&mut base, &self.canvas, 0, 0);
        }
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(base)
            .to_rgb8()
            .write_to(&mut out, ImageFormat::Jpeg)?;
        Ok(Bytes::from(out.into_inner()))
    }
}

fn draw_detection(canvas: &mut Blend<RgbaImage>, active: &ActiveDetection, alpha: u8) {
    let (width, height) = canvas.0.dimensions();
    let [r, g, b] = active.color;
    let color = Rgba([r, g, b, alpha]);
    let d = &active.detection;

    let x0 = d.x.max(0.0).round() as i32;
    let y0 = d.y.max(0.0).round() as i32;
    let x1 = (d.x + d.width).min(width as f32 - 1.0).round() as i32;
    let y1 = (d.y + d.height).min(height as f32 - 1.0).round() as i32;
    if x1 <= x0 || y1 <= y0 {
        return;
    }

    for t in 0..BOX_THICKNESS as i32 {
        let w = x1 - x0 - 2 * t;
        let h = y1 - y0 - 2 * t;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x0 + t, y0 + t).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }

    // Tag sits above the box, or just inside it at the top edge
    let tag_width = (active.label().len() as u32 * TAG_CHAR_WIDTH + TAG_PADDING).min(width);
    let tag_y = if y0 >= TAG_HEIGHT as i32 {
        y0 - TAG_HEIGHT as i32
    } else {
        y0
    };
    let tag = Rect::at(x0, tag_y).of_size(tag_width, TAG_HEIGHT.min(height));
    draw_filled_rect_mut(canvas, tag, color);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(class: &str, category: WasteCategory) -> Classified {
        Classified {
            detection: Detection {
                class: class.to_string(),
                confidence: 0.85,
                x: 20.0,
                y: 30.0,
                width: 40.0,
                height: 20.0,
            },
            category,
        }
    }

    const DISPLAY: Duration = Duration::from_millis(3000);

    #[test]
    fn test_expiry_boundary() {
        let mut overlay = OverlayRenderer::new(DISPLAY);
        let t0 = Instant::now();
        overlay.add([classified("Plastic", WasteCategory::Plastic)], t0);

        assert_eq!(overlay.visible(t0 + Duration::from_millis(2999)).count(), 1);
        assert_eq!(overlay.visible(t0 + Duration::from_millis(3000)).count(), 0);
        assert_eq!(overlay.visible(t0 + Duration::from_millis(3001)).count(), 0);

        assert_eq!(overlay.prune(t0 + Duration::from_millis(2999)), 0);
        assert_eq!(overlay.prune(t0 + Duration::from_millis(3001)), 1);
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_opacity_fades_in_last_second() {
        let t0 = Instant::now();
        let active = ActiveDetection::new(classified("Cup", WasteCategory::Recyclable), t0);
        approx::assert_relative_eq!(active.opacity(t0, DISPLAY), 1.0);
        approx::assert_relative_eq!(
            active.opacity(t0 + Duration::from_millis(2500), DISPLAY),
            0.5,
            epsilon = 1e-3
        );
        approx::assert_relative_eq!(active.opacity(t0 + DISPLAY, DISPLAY), 0.0);
        assert_eq!(active.color, [59, 130, 246]);
        assert_eq!(active.display_name, "Recyclable");
    }

    #[test]
    fn test_render_draws_box_in_category_color() {
        let mut overlay = OverlayRenderer::new(DISPLAY);
        let t0 = Instant::now();
        overlay.add([classified("Plastic", WasteCategory::Plastic)], t0);
        overlay.render(t0, 100, 80);

        let canvas = overlay.canvas();
        assert_eq!(canvas.dimensions(), (100, 80));
        // Left edge of the box
        let edge = canvas.get_pixel(20, 40);
        assert!(edge[0] > 230 && edge[1] < 80 && edge[2] < 80);
        assert!(edge[3] > 250);
        // Box interior stays transparent
        assert_eq!(canvas.get_pixel(40, 40)[3], 0);
        // Tag above the box
        assert!(canvas.get_pixel(22, 20)[3] > 0);
    }

    #[test]
    fn test_clear_blanks_canvas() {
        let mut overlay = OverlayRenderer::new(DISPLAY);
        let t0 = Instant::now();
        overlay.add([classified("Plastic", WasteCategory::Plastic)], t0);
        overlay.render(t0, 100, 80);
        overlay.clear();
        assert!(overlay.is_empty());
        assert!(overlay.canvas().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_png_encoding() {
        let overlay = OverlayRenderer::new(DISPLAY);
        let png = overlay.encode_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
