//! Software canvas over an RGBA bitmap.
//!
//! Pixels are stored unpremultiplied; blending happens in premultiplied
//! space with the Porter-Duff factors of the current composite rule. Shapes
//! are aliased except glyphs, whose masks carry fractional coverage.

use std::borrow::Cow;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tracing::warn;

use super::glyph::{BoxGlyphs, GlyphRasterizer};
use super::{Canvas, canvas_size_allowed};
use crate::protocol::{
    Argb, CompositeRule, FontSpec, PaintValue, Point, Rect, Size, Transform,
};

const COORD_LIMIT: f64 = (1 << 29) as f64;
const MAX_STROKE_PX: f64 = 4096.0;

#[derive(Debug, Clone, PartialEq)]
struct DrawState {
    paint: PaintValue,
    font: FontSpec,
    rule: CompositeRule,
    alpha: f32,
    /// Device space, fixed when the clip was set.
    clip: Option<Rect>,
    stroke: f32,
    transform: Transform,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            paint: PaintValue::Color { argb: Argb::BLACK },
            font: FontSpec::default(),
            rule: CompositeRule::SrcOver,
            alpha: 1.0,
            clip: None,
            stroke: 1.0,
            transform: Transform::IDENTITY,
        }
    }
}

pub struct RasterCanvas {
    pixels: RgbaImage,
    state: DrawState,
    glyphs: Arc<dyn GlyphRasterizer>,
}

impl std::fmt::Debug for RasterCanvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterCanvas")
            .field("width", &self.pixels.width())
            .field("height", &self.pixels.height())
            .field("state", &self.state)
            .finish()
    }
}

impl RasterCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_glyphs(width, height, Arc::new(BoxGlyphs))
    }

    pub fn with_glyphs(width: u32, height: u32, glyphs: Arc<dyn GlyphRasterizer>) -> Self {
        Self::from_image(RgbaImage::new(width, height), glyphs)
    }

    pub fn from_image(pixels: RgbaImage, glyphs: Arc<dyn GlyphRasterizer>) -> Self {
        Self {
            pixels,
            state: DrawState::default(),
            glyphs,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    pub fn glyphs(&self) -> &Arc<dyn GlyphRasterizer> {
        &self.glyphs
    }

    /// Keeps the overlapping top-left region; new area is transparent.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.pixels.dimensions() == (width, height) {
            return;
        }
        let mut next = RgbaImage::new(width, height);
        imageops::replace(&mut next, &self.pixels, 0, 0);
        self.pixels = next;
    }

    fn canvas_rect(&self) -> Rect {
        Rect::new(
            0,
            0,
            self.pixels.width().min(i32::MAX as u32) as i32,
            self.pixels.height().min(i32::MAX as u32) as i32,
        )
    }

    /// Canvas intersected with the current clip.
    fn bounds(&self) -> Rect {
        let canvas = self.canvas_rect();
        match &self.state.clip {
            Some(clip) => canvas.intersect(clip),
            None => canvas,
        }
    }

    fn to_device(&self, x: i32, y: i32) -> (f64, f64) {
        self.state.transform.apply(x as f64, y as f64)
    }

    fn device_rect(&self, rect: Rect) -> Rect {
        let (x0, y0) = self.to_device(rect.x, rect.y);
        let (x1, y1) = self.to_device(rect.right(), rect.bottom());
        rect_from_edges(
            x0.min(x1).round(),
            y0.min(y1).round(),
            x0.max(x1).round(),
            y0.max(y1).round(),
        )
    }

    fn stroke_px(&self) -> i32 {
        let t = &self.state.transform;
        let scale = (t.scale_x.abs() + t.scale_y.abs()) / 2.0;
        ((self.state.stroke as f64) * scale)
            .round()
            .clamp(1.0, MAX_STROKE_PX) as i32
    }

    fn source_at(&self, x: i32, y: i32) -> [f32; 4] {
        match &self.state.paint {
            PaintValue::Color { argb } => unpack(*argb),
            PaintValue::Gradient {
                start,
                end,
                start_color,
                end_color,
            } => {
                let (sx, sy) = self.to_device(start.x, start.y);
                let (ex, ey) = self.to_device(end.x, end.y);
                let (dx, dy) = (ex - sx, ey - sy);
                let len2 = dx * dx + dy * dy;
                let t = if len2 <= f64::EPSILON {
                    0.0
                } else {
                    (((x as f64 + 0.5) - sx) * dx + ((y as f64 + 0.5) - sy) * dy) / len2
                };
                lerp(unpack(*start_color), unpack(*end_color), t.clamp(0.0, 1.0) as f32)
            }
        }
    }

    /// Caller guarantees `(x, y)` lies inside the canvas.
    fn blend(&mut self, x: i32, y: i32, src: [f32; 4], coverage: f32) {
        let (px, py) = (x as u32, y as u32);
        let dst = premultiply(self.pixels.get_pixel(px, py).0);
        let sa = src[3] * self.state.alpha.clamp(0.0, 1.0);
        let src = [src[0] * sa, src[1] * sa, src[2] * sa, sa];
        let (fa, fb) = porter_duff(self.state.rule, src[3], dst[3]);
        let mut out = [0f32; 4];
        for i in 0..4 {
            let composed = src[i] * fa + dst[i] * fb;
            out[i] = dst[i] + (composed - dst[i]) * coverage;
        }
        self.pixels.put_pixel(px, py, Rgba(unpremultiply(out)));
    }

    fn fill_area(&mut self, area: Rect) {
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                let src = self.source_at(x, y);
                self.blend(x, y, src, 1.0);
            }
        }
    }

    fn composite_mask(&mut self, mask: &Mask) {
        let area = mask.area;
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                if mask.covered(x, y) {
                    let src = self.source_at(x, y);
                    self.blend(x, y, src, 1.0);
                }
            }
        }
    }

    fn stroke_path(&mut self, points: &[(f64, f64)]) {
        if points.is_empty() {
            return;
        }
        let width = self.stroke_px();
        let pad = width as f64;
        let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
        let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
        for &(x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let area = rect_from_edges(
            (min_x - pad).floor(),
            (min_y - pad).floor(),
            (max_x + pad).ceil() + 1.0,
            (max_y + pad).ceil() + 1.0,
        )
        .intersect(&self.bounds());
        if area.is_empty() {
            return;
        }
        let mut mask = Mask::new(area);
        if points.len() == 1 {
            let (x, y) = points[0];
            mask.stamp(x.round() as i32, y.round() as i32, width);
        }
        for pair in points.windows(2) {
            if let Some((a, b)) = clip_segment(pair[0], pair[1], area, pad) {
                bresenham(
                    (a.0.round() as i32, a.1.round() as i32),
                    (b.0.round() as i32, b.1.round() as i32),
                    |x, y| mask.stamp(x, y, width),
                );
            }
        }
        self.composite_mask(&mask);
    }

    fn device_points(&self, points: &[Point]) -> Vec<(f64, f64)> {
        points.iter().map(|p| self.to_device(p.x, p.y)).collect()
    }

    fn oval(&mut self, rect: Rect, ring: Option<f64>) {
        let device = self.device_rect(rect);
        if device.is_empty() {
            return;
        }
        let half = ring.unwrap_or(0.0);
        let rx = device.width as f64 / 2.0;
        let ry = device.height as f64 / 2.0;
        let cx = device.x as f64 + rx;
        let cy = device.y as f64 + ry;
        let pad = half.ceil() as i32;
        let search = Rect::new(
            device.x.saturating_sub(pad),
            device.y.saturating_sub(pad),
            device.width.saturating_add(2 * pad),
            device.height.saturating_add(2 * pad),
        )
        .intersect(&self.bounds());
        let inside = |px: f64, py: f64, rx: f64, ry: f64| {
            if rx <= 0.0 || ry <= 0.0 {
                return false;
            }
            let nx = (px - cx) / rx;
            let ny = (py - cy) / ry;
            nx * nx + ny * ny <= 1.0
        };
        for y in search.y..search.bottom() {
            for x in search.x..search.right() {
                let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
                let hit = match ring {
                    None => inside(px, py, rx, ry),
                    Some(_) => {
                        inside(px, py, rx + half, ry + half)
                            && !inside(px, py, rx - half, ry - half)
                    }
                };
                if hit {
                    let src = self.source_at(x, y);
                    self.blend(x, y, src, 1.0);
                }
            }
        }
    }
}

impl Canvas for RasterCanvas {
    fn size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    fn set_paint(&mut self, paint: &PaintValue) {
        self.state.paint = paint.clone();
    }

    fn set_font(&mut self, font: FontSpec) {
        self.state.font = font;
    }

    fn set_composite(&mut self, rule: CompositeRule, alpha: f32) {
        self.state.rule = rule;
        self.state.alpha = if alpha.is_finite() {
            alpha.clamp(0.0, 1.0)
        } else {
            1.0
        };
    }

    fn set_clip(&mut self, clip: Option<Rect>) {
        self.state.clip = clip.map(|rect| self.device_rect(rect));
    }

    fn set_stroke(&mut self, width: f32) {
        self.state.stroke = if width.is_finite() { width.max(0.0) } else { 1.0 };
    }

    fn set_transform(&mut self, transform: Transform) {
        self.state.transform = transform;
    }

    fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) {
        let points = [self.to_device(x1, y1), self.to_device(x2, y2)];
        self.stroke_path(&points);
    }

    fn draw_rect(&mut self, rect: Rect) {
        if rect.width < 0 || rect.height < 0 {
            return;
        }
        let corners = [
            Point::new(rect.x, rect.y),
            Point::new(rect.right(), rect.y),
            Point::new(rect.right(), rect.bottom()),
            Point::new(rect.x, rect.bottom()),
            Point::new(rect.x, rect.y),
        ];
        let points = self.device_points(&corners);
        self.stroke_path(&points);
    }

    fn fill_rect(&mut self, rect: Rect) {
        let area = self.device_rect(rect).intersect(&self.bounds());
        self.fill_area(area);
    }

    fn clear_rect(&mut self, rect: Rect) {
        let area = self.device_rect(rect).intersect(&self.bounds());
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                self.pixels.put_pixel(x as u32, y as u32, Rgba([0, 0, 0, 0]));
            }
        }
    }

    fn draw_oval(&mut self, rect: Rect) {
        let half = self.stroke_px() as f64 / 2.0;
        self.oval(rect, Some(half));
    }

    fn fill_oval(&mut self, rect: Rect) {
        self.oval(rect, None);
    }

    fn draw_polyline(&mut self, points: &[Point]) {
        let points = self.device_points(points);
        self.stroke_path(&points);
    }

    fn fill_polygon(&mut self, points: &[Point]) {
        if points.len() < 3 {
            return;
        }
        let device = self.device_points(points);
        let (mut min_y, mut max_y) = (f64::MAX, f64::MIN);
        for &(_, y) in &device {
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
        let bounds = self.bounds();
        let top = (min_y.floor().max(bounds.y as f64)) as i32;
        let bottom = (max_y.ceil().min(bounds.bottom() as f64)) as i32;
        let mut crossings: Vec<f64> = Vec::with_capacity(device.len());
        for y in top..bottom {
            let yc = y as f64 + 0.5;
            crossings.clear();
            for (idx, &(ax, ay)) in device.iter().enumerate() {
                let (bx, by) = device[(idx + 1) % device.len()];
                if (ay <= yc) != (by <= yc) {
                    crossings.push(ax + (yc - ay) * (bx - ax) / (by - ay));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));
            for span in crossings.chunks_exact(2) {
                let start = ((span[0] - 0.5).ceil().max(bounds.x as f64)) as i32;
                let end = ((span[1] - 0.5).ceil().min(bounds.right() as f64)) as i32;
                for x in start..end {
                    let src = self.source_at(x, y);
                    self.blend(x, y, src, 1.0);
                }
            }
        }
    }

    fn draw_string(&mut self, text: &str, x: i32, y: i32, desired_width: f64) {
        let font = self.state.font;
        let (ox, oy) = self.to_device(x, y);
        let scale = self.state.transform.scale_x;
        let natural = self.glyphs.measure(text, font) as f64;
        let stretch = if desired_width > 0.0 && natural > 0.0 {
            desired_width / natural
        } else {
            1.0
        };
        let bounds = self.bounds();
        let glyphs = Arc::clone(&self.glyphs);
        let mut pen = 0.0;
        for ch in text.chars() {
            let glyph = glyphs.rasterize(ch, font);
            let left = (ox + pen * stretch * scale).round() as i32;
            let top = (oy.round() as i32).saturating_sub(glyph.ascent);
            for gy in 0..glyph.height {
                for gx in 0..glyph.width {
                    let coverage = glyph.coverage_at(gx, gy);
                    if coverage == 0 {
                        continue;
                    }
                    let (px, py) = (left + gx as i32, top + gy as i32);
                    if px < bounds.x || py < bounds.y || px >= bounds.right() || py >= bounds.bottom()
                    {
                        continue;
                    }
                    let src = self.source_at(px, py);
                    self.blend(px, py, src, coverage as f32 / 255.0);
                }
            }
            pen += glyph.advance as f64;
        }
    }

    fn draw_image(&mut self, image: &RgbaImage, x: i32, y: i32, scale_to: Option<Size>) {
        let (iw, ih) = image.dimensions();
        if iw == 0 || ih == 0 {
            return;
        }
        let (tw, th) = scale_to.map_or((iw, ih), |size| (size.width, size.height));
        let t = self.state.transform;
        let tw = ((tw as f64) * t.scale_x.abs()).round() as u32;
        let th = ((th as f64) * t.scale_y.abs()).round() as u32;
        if tw == 0 || th == 0 {
            return;
        }
        if !canvas_size_allowed(tw, th) {
            warn!(
                target = "replay::render",
                width = tw,
                height = th,
                "refusing to scale image beyond canvas limits"
            );
            return;
        }
        let scaled: Cow<'_, RgbaImage> = if (tw, th) == (iw, ih) {
            Cow::Borrowed(image)
        } else {
            Cow::Owned(imageops::resize(image, tw, th, FilterType::Triangle))
        };
        let (dx, dy) = self.to_device(x, y);
        let left = dx.round() as i32;
        let top = dy.round() as i32;
        let area = Rect::new(left, top, tw as i32, th as i32).intersect(&self.bounds());
        for py in area.y..area.bottom() {
            for px in area.x..area.right() {
                let texel = scaled.get_pixel((px - left) as u32, (py - top) as u32).0;
                let src = [
                    texel[0] as f32 / 255.0,
                    texel[1] as f32 / 255.0,
                    texel[2] as f32 / 255.0,
                    texel[3] as f32 / 255.0,
                ];
                self.blend(px, py, src, 1.0);
            }
        }
    }

    fn copy_area(&mut self, rect: Rect, dx: i32, dy: i32) {
        let source = self.device_rect(rect).intersect(&self.canvas_rect());
        if source.is_empty() {
            return;
        }
        let t = self.state.transform;
        let ddx = ((dx as f64) * t.scale_x).round() as i32;
        let ddy = ((dy as f64) * t.scale_y).round() as i32;
        let dest = Rect::new(
            source.x.saturating_add(ddx),
            source.y.saturating_add(ddy),
            source.width,
            source.height,
        )
        .intersect(&self.bounds());
        if dest.is_empty() {
            return;
        }
        let snapshot = imageops::crop_imm(
            &self.pixels,
            source.x as u32,
            source.y as u32,
            source.width as u32,
            source.height as u32,
        )
        .to_image();
        for y in dest.y..dest.bottom() {
            for x in dest.x..dest.right() {
                let sx = (x - ddx - source.x) as u32;
                let sy = (y - ddy - source.y) as u32;
                self.pixels
                    .put_pixel(x as u32, y as u32, *snapshot.get_pixel(sx, sy));
            }
        }
    }
}

/// Aliased coverage over a bounded device area, so overlapping strokes
/// blend each pixel once.
struct Mask {
    area: Rect,
    cells: Vec<bool>,
}

impl Mask {
    fn new(area: Rect) -> Self {
        let len = if area.is_empty() {
            0
        } else {
            area.width as usize * area.height as usize
        };
        Self {
            area,
            cells: vec![false; len],
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let area = self.area;
        if x < area.x || y < area.y || x >= area.right() || y >= area.bottom() {
            return None;
        }
        Some((y - area.y) as usize * area.width as usize + (x - area.x) as usize)
    }

    fn cover(&mut self, x: i32, y: i32) {
        if let Some(idx) = self.index(x, y) {
            self.cells[idx] = true;
        }
    }

    fn covered(&self, x: i32, y: i32) -> bool {
        self.index(x, y).is_some_and(|idx| self.cells[idx])
    }

    fn stamp(&mut self, x: i32, y: i32, width: i32) {
        let lo = -(width - 1) / 2;
        let hi = width / 2;
        for oy in lo..=hi {
            for ox in lo..=hi {
                self.cover(x.saturating_add(ox), y.saturating_add(oy));
            }
        }
    }
}

fn rect_from_edges(left: f64, top: f64, right: f64, bottom: f64) -> Rect {
    let clamp = |v: f64| v.clamp(-COORD_LIMIT, COORD_LIMIT) as i32;
    let (l, t, r, b) = (clamp(left), clamp(top), clamp(right), clamp(bottom));
    Rect::new(l, t, (r - l).max(0), (b - t).max(0))
}

/// Liang-Barsky clip of a segment to `area` grown by `pad` on every side.
fn clip_segment(
    p0: (f64, f64),
    p1: (f64, f64),
    area: Rect,
    pad: f64,
) -> Option<((f64, f64), (f64, f64))> {
    let (x_min, y_min) = (area.x as f64 - pad, area.y as f64 - pad);
    let (x_max, y_max) = (area.right() as f64 + pad, area.bottom() as f64 + pad);
    let (dx, dy) = (p1.0 - p0.0, p1.1 - p0.1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [
        (-dx, p0.0 - x_min),
        (dx, x_max - p0.0),
        (-dy, p0.1 - y_min),
        (dy, y_max - p0.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    Some((
        (p0.0 + t0 * dx, p0.1 + t0 * dy),
        (p0.0 + t1 * dx, p0.1 + t1 * dy),
    ))
}

fn bresenham(from: (i32, i32), to: (i32, i32), mut plot: impl FnMut(i32, i32)) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        plot(x, y);
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Source and destination factors for premultiplied compositing.
fn porter_duff(rule: CompositeRule, src_alpha: f32, dst_alpha: f32) -> (f32, f32) {
    match rule {
        CompositeRule::Clear => (0.0, 0.0),
        CompositeRule::Src => (1.0, 0.0),
        CompositeRule::Dst => (0.0, 1.0),
        CompositeRule::SrcOver => (1.0, 1.0 - src_alpha),
        CompositeRule::DstOver => (1.0 - dst_alpha, 1.0),
        CompositeRule::SrcIn => (dst_alpha, 0.0),
        CompositeRule::DstIn => (0.0, src_alpha),
        CompositeRule::SrcOut => (1.0 - dst_alpha, 0.0),
        CompositeRule::DstOut => (0.0, 1.0 - src_alpha),
        CompositeRule::SrcAtop => (dst_alpha, 1.0 - src_alpha),
        CompositeRule::DstAtop => (1.0 - dst_alpha, src_alpha),
        CompositeRule::Xor => (1.0 - dst_alpha, 1.0 - src_alpha),
    }
}

fn unpack(argb: Argb) -> [f32; 4] {
    [
        argb.red() as f32 / 255.0,
        argb.green() as f32 / 255.0,
        argb.blue() as f32 / 255.0,
        argb.alpha() as f32 / 255.0,
    ]
}

fn lerp(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    let mut out = [0f32; 4];
    for i in 0..4 {
        out[i] = a[i] + (b[i] - a[i]) * t;
    }
    out
}

fn premultiply(px: [u8; 4]) -> [f32; 4] {
    let a = px[3] as f32 / 255.0;
    [
        px[0] as f32 / 255.0 * a,
        px[1] as f32 / 255.0 * a,
        px[2] as f32 / 255.0 * a,
        a,
    ]
}

fn unpremultiply(px: [f32; 4]) -> [u8; 4] {
    let a = px[3].clamp(0.0, 1.0);
    if a <= 0.0 {
        return [0, 0, 0, 0];
    }
    let channel = |c: f32| ((c / a).clamp(0.0, 1.0) * 255.0).round() as u8;
    [
        channel(px[0]),
        channel(px[1]),
        channel(px[2]),
        (a * 255.0).round() as u8,
    ]
}
