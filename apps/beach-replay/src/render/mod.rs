pub mod glyph;
pub mod processor;
pub mod raster;
pub mod surface;

use image::RgbaImage;

use crate::protocol::{CompositeRule, FontSpec, PaintValue, Point, Rect, Size, Transform};

pub use glyph::{BoxGlyphs, Glyph, GlyphRasterizer};
pub use processor::PaintProcessor;
pub use raster::RasterCanvas;
pub use surface::{ImageTarget, PresentTarget, RenderingSurface, SurfaceState, TrackedCanvas};

/// Upper bound on pixels for any canvas sized by the peer.
pub const MAX_CANVAS_PIXELS: u64 = 1 << 26;

pub fn canvas_size_allowed(width: u32, height: u32) -> bool {
    (width as u64) * (height as u64) <= MAX_CANVAS_PIXELS
}

/// Drawing operations replayed from server events. State setters affect
/// every later draw call until changed again.
pub trait Canvas {
    fn size(&self) -> (u32, u32);

    fn set_paint(&mut self, paint: &PaintValue);
    fn set_font(&mut self, font: FontSpec);
    fn set_composite(&mut self, rule: CompositeRule, alpha: f32);
    fn set_clip(&mut self, clip: Option<Rect>);
    fn set_stroke(&mut self, width: f32);
    fn set_transform(&mut self, transform: Transform);

    fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32);
    fn draw_rect(&mut self, rect: Rect);
    fn fill_rect(&mut self, rect: Rect);
    fn clear_rect(&mut self, rect: Rect);
    fn draw_oval(&mut self, rect: Rect);
    fn fill_oval(&mut self, rect: Rect);
    fn draw_polyline(&mut self, points: &[Point]);
    fn fill_polygon(&mut self, points: &[Point]);
    fn draw_string(&mut self, text: &str, x: i32, y: i32, desired_width: f64);
    fn draw_image(&mut self, image: &RgbaImage, x: i32, y: i32, scale_to: Option<Size>);
    fn copy_area(&mut self, rect: Rect, dx: i32, dy: i32);
}
