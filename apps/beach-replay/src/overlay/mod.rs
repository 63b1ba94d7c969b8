//! Speculative local echo for typed characters.
//!
//! While the host owns the truth about editor contents, a key press can be
//! previewed locally: the text right of the caret is shifted over by the
//! glyph's advance and the glyph is painted into the gap. The overlay only
//! remembers which glyphs were predicted; every frame it shows is composed
//! on top of the current back buffer, so host paint that lands while a
//! prediction is live stays visible. Predictions are thrown away as soon as
//! the host reports new caret state, or when they grow stale.

mod classify;

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use tracing::trace;

pub use classify::should_skip;

use crate::metrics;
use crate::protocol::{CaretGeometry, CaretInfoChange, CompositeRule, KeyPress, PaintValue, Rect};
use crate::render::{Canvas, GlyphRasterizer, RasterCanvas};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OverlayState {
    #[default]
    Inactive,
    Active(CaretGeometry),
}

#[derive(Debug, Clone, Copy)]
struct PredictedGlyph {
    ch: char,
    /// Distance from the caret to this glyph's left edge.
    offset: i32,
    width: i32,
    /// Pixels of existing text right of the glyph that get shifted over.
    room: i32,
}

struct Prediction {
    glyphs: Vec<PredictedGlyph>,
    created: Instant,
}

impl Prediction {
    fn advance(&self) -> i32 {
        self.glyphs.last().map_or(0, |glyph| glyph.offset + glyph.width)
    }
}

pub struct SpeculativeInputOverlay {
    state: OverlayState,
    glyphs: Arc<dyn GlyphRasterizer>,
    timeout: Duration,
    prediction: Option<Prediction>,
}

impl SpeculativeInputOverlay {
    pub fn new(glyphs: Arc<dyn GlyphRasterizer>, timeout: Duration) -> Self {
        Self {
            state: OverlayState::Inactive,
            glyphs,
            timeout,
            prediction: None,
        }
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    /// Whether predicted glyphs are waiting for the host to confirm them.
    pub fn is_predicting(&self) -> bool {
        self.prediction.is_some()
    }

    /// Number of glyphs in the live prediction.
    pub fn predicted_len(&self) -> usize {
        self.prediction.as_ref().map_or(0, |p| p.glyphs.len())
    }

    /// Replaces caret state wholesale. Returns whether a visible prediction
    /// was discarded.
    pub fn on_caret_info(&mut self, change: CaretInfoChange) -> bool {
        self.state = match change {
            CaretInfoChange::NoCarets => OverlayState::Inactive,
            CaretInfoChange::Carets(geometry) => OverlayState::Active(geometry),
        };
        self.prediction.take().is_some()
    }

    /// Drops a prediction older than the timeout. Returns whether one was
    /// dropped.
    pub fn expire(&mut self, now: Instant) -> bool {
        let stale = self
            .prediction
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.created) >= self.timeout);
        if stale {
            self.prediction = None;
            record("expired");
        }
        stale
    }

    /// Predicts `key` at the first caret, after any glyphs already
    /// predicted, and returns `surface` with the whole prediction on top.
    pub fn on_key_press(
        &mut self,
        key: KeyPress,
        surface: &RgbaImage,
        now: Instant,
    ) -> Option<RgbaImage> {
        if should_skip(key.ch, key.modifiers) {
            record("skipped");
            trace!(target = "replay::overlay", ch = ?key.ch, modifiers = ?key.modifiers, "not echoing key");
            return None;
        }
        let OverlayState::Active(geometry) = &self.state else {
            record("no_caret");
            return None;
        };
        let Some(caret) = geometry.carets.first().copied() else {
            record("no_caret");
            return None;
        };
        let width = self.glyphs.advance(key.ch, geometry.font);
        if width <= 0 {
            record("zero_width");
            return None;
        }

        let offset = self.prediction.as_ref().map_or(0, Prediction::advance);
        let x = caret.x.saturating_add(offset);
        let limit = geometry
            .editor_bounds
            .right()
            .saturating_sub(geometry.scrollbar_width);
        let room = limit.saturating_sub(x).saturating_sub(width);
        if room < 0 {
            record("no_room");
            trace!(target = "replay::overlay", x, width, limit, "no room before scrollbar");
            return None;
        }

        let glyph = PredictedGlyph {
            ch: key.ch,
            offset,
            width,
            room,
        };
        let prediction = self.prediction.get_or_insert_with(|| Prediction {
            glyphs: Vec::new(),
            created: now,
        });
        prediction.glyphs.push(glyph);
        prediction.created = now;
        record("drawn");
        trace!(target = "replay::overlay", ch = ?key.ch, x, y = caret.y, "speculative glyph drawn");
        self.compose(surface)
    }

    /// `surface` with the live prediction painted over it, or `None` when
    /// nothing is predicted.
    pub fn compose(&self, surface: &RgbaImage) -> Option<RgbaImage> {
        let prediction = self.prediction.as_ref()?;
        let OverlayState::Active(geometry) = &self.state else {
            return None;
        };
        let caret = geometry.carets.first().copied()?;
        let mut canvas = RasterCanvas::from_image(surface.clone(), Arc::clone(&self.glyphs));
        for glyph in &prediction.glyphs {
            paint_glyph(&mut canvas, geometry, caret.x + glyph.offset, caret.y, glyph);
        }
        Some(canvas.into_image())
    }
}

fn paint_glyph(
    canvas: &mut RasterCanvas,
    geometry: &CaretGeometry,
    x: i32,
    y: i32,
    glyph: &PredictedGlyph,
) {
    let line_height = geometry.line_height;
    canvas.set_clip(Some(Rect::new(x, y, glyph.width + glyph.room, line_height)));
    canvas.copy_area(Rect::new(x, y, glyph.room, line_height), glyph.width, 0);

    canvas.set_composite(CompositeRule::Src, 1.0);
    canvas.set_paint(&PaintValue::Color {
        argb: geometry.background_color,
    });
    canvas.fill_rect(Rect::new(x, y, glyph.width, line_height));

    canvas.set_composite(CompositeRule::SrcOver, 1.0);
    canvas.set_paint(&PaintValue::Color {
        argb: geometry.text_color,
    });
    canvas.set_font(geometry.font);
    let mut buf = [0u8; 4];
    canvas.draw_string(glyph.ch.encode_utf8(&mut buf), x, y + geometry.line_ascent, 0.0);
}

fn record(outcome: &str) {
    metrics::SPECULATIVE_GLYPHS
        .with_label_values(&[outcome])
        .inc();
}
