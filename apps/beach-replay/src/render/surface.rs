//! Double-buffered drawing surface.
//!
//! Replayed paint calls land in an off-screen [`RasterCanvas`] wrapped in a
//! [`TrackedCanvas`]. Only [`RenderingSurface::flush`] touches the visible
//! target, and only when something was drawn since the last flush.

use std::sync::Arc;

use image::RgbaImage;
use image::imageops;
use tracing::trace;

use super::glyph::GlyphRasterizer;
use super::{Canvas, RasterCanvas};
use crate::protocol::{CompositeRule, FontSpec, PaintValue, Point, Rect, Size, Transform};

/// Where flushed frames end up.
pub trait PresentTarget {
    /// Resize, keeping the overlapping region.
    fn resize(&mut self, width: u32, height: u32);
    fn present(&mut self, frame: &RgbaImage);
}

/// In-memory target holding the last presented frame.
#[derive(Debug, Clone, Default)]
pub struct ImageTarget {
    frame: RgbaImage,
    presents: u64,
}

impl ImageTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: RgbaImage::new(width, height),
            presents: 0,
        }
    }

    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }
}

impl PresentTarget for ImageTarget {
    fn resize(&mut self, width: u32, height: u32) {
        if self.frame.dimensions() == (width, height) {
            return;
        }
        let mut next = RgbaImage::new(width, height);
        imageops::replace(&mut next, &self.frame, 0, 0);
        self.frame = next;
    }

    fn present(&mut self, frame: &RgbaImage) {
        if self.frame.dimensions() == frame.dimensions() {
            self.frame.copy_from_slice(frame.as_raw());
        } else {
            self.frame = frame.clone();
        }
        self.presents += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Clean,
    Dirty,
}

/// Forwards every call and records whether pixels may have changed. State
/// setters alone leave the canvas clean.
#[derive(Debug)]
pub struct TrackedCanvas<C> {
    inner: C,
    dirty: bool,
}

impl<C: Canvas> TrackedCanvas<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            dirty: false,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

impl<C: Canvas> Canvas for TrackedCanvas<C> {
    fn size(&self) -> (u32, u32) {
        self.inner.size()
    }

    fn set_paint(&mut self, paint: &PaintValue) {
        self.inner.set_paint(paint);
    }

    fn set_font(&mut self, font: FontSpec) {
        self.inner.set_font(font);
    }

    fn set_composite(&mut self, rule: CompositeRule, alpha: f32) {
        self.inner.set_composite(rule, alpha);
    }

    fn set_clip(&mut self, clip: Option<Rect>) {
        self.inner.set_clip(clip);
    }

    fn set_stroke(&mut self, width: f32) {
        self.inner.set_stroke(width);
    }

    fn set_transform(&mut self, transform: Transform) {
        self.inner.set_transform(transform);
    }

    fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) {
        self.dirty = true;
        self.inner.draw_line(x1, y1, x2, y2);
    }

    fn draw_rect(&mut self, rect: Rect) {
        self.dirty = true;
        self.inner.draw_rect(rect);
    }

    fn fill_rect(&mut self, rect: Rect) {
        self.dirty = true;
        self.inner.fill_rect(rect);
    }

    fn clear_rect(&mut self, rect: Rect) {
        self.dirty = true;
        self.inner.clear_rect(rect);
    }

    fn draw_oval(&mut self, rect: Rect) {
        self.dirty = true;
        self.inner.draw_oval(rect);
    }

    fn fill_oval(&mut self, rect: Rect) {
        self.dirty = true;
        self.inner.fill_oval(rect);
    }

    fn draw_polyline(&mut self, points: &[Point]) {
        self.dirty = true;
        self.inner.draw_polyline(points);
    }

    fn fill_polygon(&mut self, points: &[Point]) {
        self.dirty = true;
        self.inner.fill_polygon(points);
    }

    fn draw_string(&mut self, text: &str, x: i32, y: i32, desired_width: f64) {
        self.dirty = true;
        self.inner.draw_string(text, x, y, desired_width);
    }

    fn draw_image(&mut self, image: &RgbaImage, x: i32, y: i32, scale_to: Option<Size>) {
        self.dirty = true;
        self.inner.draw_image(image, x, y, scale_to);
    }

    fn copy_area(&mut self, rect: Rect, dx: i32, dy: i32) {
        self.dirty = true;
        self.inner.copy_area(rect, dx, dy);
    }
}

pub struct RenderingSurface<T> {
    buffer: TrackedCanvas<RasterCanvas>,
    target: T,
}

impl<T: PresentTarget> RenderingSurface<T> {
    pub fn new(mut target: T, width: u32, height: u32, glyphs: Arc<dyn GlyphRasterizer>) -> Self {
        target.resize(width, height);
        Self {
            buffer: TrackedCanvas::new(RasterCanvas::with_glyphs(width, height, glyphs)),
            target,
        }
    }

    /// Drawing entry point; everything drawn here stays off-screen until
    /// the next [`flush`](Self::flush).
    pub fn canvas(&mut self) -> &mut TrackedCanvas<RasterCanvas> {
        &mut self.buffer
    }

    pub fn buffer_image(&self) -> &RgbaImage {
        self.buffer.inner().image()
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn size(&self) -> (u32, u32) {
        self.buffer.size()
    }

    pub fn state(&self) -> SurfaceState {
        if self.buffer.is_dirty() {
            SurfaceState::Dirty
        } else {
            SurfaceState::Clean
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.buffer.is_dirty()
    }

    /// Forces the next flush to present even if nothing was drawn, e.g.
    /// after something else was shown on the target.
    pub fn invalidate(&mut self) {
        self.buffer.mark_dirty();
    }

    /// Copies the buffer to the target if it changed. Returns whether a
    /// present happened.
    pub fn flush(&mut self) -> bool {
        self.flush_composed(|_| None)
    }

    /// Like [`flush`](Self::flush), but `compose` may return a frame built
    /// on top of the buffer to present in its place.
    pub fn flush_composed<F>(&mut self, compose: F) -> bool
    where
        F: FnOnce(&RgbaImage) -> Option<RgbaImage>,
    {
        let (width, height) = self.buffer.size();
        if width == 0 || height == 0 {
            return false;
        }
        if !self.buffer.take_dirty() {
            return false;
        }
        let buffer = self.buffer.inner().image();
        match compose(buffer) {
            Some(frame) => {
                self.target.present(&frame);
                trace!(target = "replay::surface", width, height, "presented composed frame");
            }
            None => {
                self.target.present(buffer);
                trace!(target = "replay::surface", width, height, "presented frame");
            }
        }
        true
    }

    pub fn set_bounds(&mut self, width: u32, height: u32) {
        if self.buffer.size() == (width, height) {
            return;
        }
        self.buffer.inner_mut().resize(width, height);
        self.target.resize(width, height);
    }

    /// Shows `overlay` on the target without touching the buffer.
    pub fn present_overlay(&mut self, overlay: &RgbaImage) {
        self.target.present(overlay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Argb;
    use crate::render::BoxGlyphs;

    fn surface(width: u32, height: u32) -> RenderingSurface<ImageTarget> {
        RenderingSurface::new(ImageTarget::default(), width, height, Arc::new(BoxGlyphs))
    }

    #[test_timeout::timeout]
    fn flush_presents_once_per_change() {
        let mut surface = surface(4, 4);
        assert!(!surface.flush());
        surface.canvas().fill_rect(Rect::new(0, 0, 2, 2));
        assert_eq!(surface.state(), SurfaceState::Dirty);
        assert!(surface.flush());
        assert!(!surface.flush());
        assert_eq!(surface.target().presents(), 1);
        assert_eq!(surface.state(), SurfaceState::Clean);
    }

    #[test_timeout::timeout]
    fn state_setters_do_not_dirty() {
        let mut surface = surface(4, 4);
        surface.canvas().set_paint(&PaintValue::Color { argb: Argb::WHITE });
        surface.canvas().set_clip(None);
        assert!(!surface.is_dirty());
    }

    #[test_timeout::timeout]
    fn zero_sized_surface_never_presents() {
        let mut surface = surface(0, 0);
        surface.canvas().fill_rect(Rect::new(0, 0, 2, 2));
        assert!(!surface.flush());
        assert_eq!(surface.target().presents(), 0);
    }

    #[test_timeout::timeout]
    fn resize_preserves_existing_pixels() {
        let mut surface = surface(4, 4);
        surface.canvas().set_paint(&PaintValue::Color {
            argb: Argb(0xFF00_FF00),
        });
        surface.canvas().fill_rect(Rect::new(0, 0, 4, 4));
        surface.flush();
        surface.set_bounds(8, 2);
        assert_eq!(surface.size(), (8, 2));
        assert_eq!(surface.buffer_image().get_pixel(3, 1).0, [0, 255, 0, 255]);
        assert_eq!(surface.buffer_image().get_pixel(6, 1).0, [0, 0, 0, 0]);
        assert_eq!(surface.target().frame().dimensions(), (8, 2));
        assert_eq!(surface.target().frame().get_pixel(3, 1).0, [0, 255, 0, 255]);
    }

    #[test_timeout::timeout]
    fn overlay_then_invalidate_restores_buffer() {
        let mut surface = surface(2, 2);
        let overlay = RgbaImage::from_pixel(2, 2, image::Rgba([9, 9, 9, 255]));
        surface.present_overlay(&overlay);
        assert_eq!(surface.target().frame().get_pixel(0, 0).0, [9, 9, 9, 255]);
        surface.invalidate();
        assert!(surface.flush());
        assert_eq!(surface.target().frame().get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test_timeout::timeout]
    fn composed_flush_presents_in_place_of_buffer() {
        let mut surface = surface(2, 2);
        surface.canvas().fill_rect(Rect::new(0, 0, 2, 2));
        let marked = surface.flush_composed(|buffer| {
            let mut frame = buffer.clone();
            frame.put_pixel(1, 1, image::Rgba([9, 9, 9, 255]));
            Some(frame)
        });
        assert!(marked);
        assert_eq!(surface.target().presents(), 1);
        assert_eq!(surface.target().frame().get_pixel(1, 1).0, [9, 9, 9, 255]);
        assert_ne!(surface.buffer_image().get_pixel(1, 1).0, [9, 9, 9, 255]);
        assert!(!surface.flush_composed(|_| unreachable!("clean buffer")));
    }
}
