use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::Canvas;
use crate::cache::{ImageCache, ImageHandle};
use crate::optimizer::StateAndPaint;
use crate::protocol::{ServerEvent, StateCategory};

/// Replays optimized bundles onto a canvas.
///
/// Remembers the last prerequisite applied per state category so a repeated
/// identical write is not re-applied.
#[derive(Debug, Default)]
pub struct PaintProcessor {
    applied: HashMap<StateCategory, ServerEvent>,
    log_unsupported: bool,
    /// Off-screen handle this processor draws into, if any.
    owner: Option<u64>,
}

impl PaintProcessor {
    pub fn new(log_unsupported: bool) -> Self {
        Self {
            applied: HashMap::new(),
            log_unsupported,
            owner: None,
        }
    }

    pub fn for_offscreen(handle: u64, log_unsupported: bool) -> Self {
        Self {
            owner: Some(handle),
            ..Self::new(log_unsupported)
        }
    }

    /// Forget remembered state, e.g. after the canvas was replaced.
    pub fn reset(&mut self) {
        self.applied.clear();
    }

    pub fn process(
        &mut self,
        canvas: &mut dyn Canvas,
        bundles: &[StateAndPaint],
        images: &ImageCache,
    ) {
        for bundle in bundles {
            for prerequisite in bundle.collapsed() {
                self.apply_prerequisite(canvas, prerequisite);
            }
            self.apply_paint(canvas, &bundle.paint, images);
        }
    }

    fn apply_prerequisite(&mut self, canvas: &mut dyn Canvas, event: &ServerEvent) {
        let Some(category) = event.category() else {
            return;
        };
        if self.applied.get(&category) == Some(event) {
            trace!(
                target = "replay::processor",
                event = event.label(),
                "skipping unchanged state"
            );
            return;
        }
        match event {
            ServerEvent::SetPaint { paint } => canvas.set_paint(paint),
            ServerEvent::SetFont { font } => canvas.set_font(*font),
            ServerEvent::SetComposite { rule, alpha } => canvas.set_composite(*rule, *alpha),
            ServerEvent::SetClip { clip } => canvas.set_clip(*clip),
            ServerEvent::SetStroke { width } => canvas.set_stroke(*width),
            ServerEvent::SetTransform { transform } => canvas.set_transform(*transform),
            _ => return,
        }
        self.applied.insert(category, event.clone());
    }

    fn apply_paint(&mut self, canvas: &mut dyn Canvas, event: &ServerEvent, images: &ImageCache) {
        match event {
            ServerEvent::DrawLine { x1, y1, x2, y2 } => canvas.draw_line(*x1, *y1, *x2, *y2),
            ServerEvent::DrawRect { rect } => canvas.draw_rect(*rect),
            ServerEvent::FillRect { rect } => canvas.fill_rect(*rect),
            ServerEvent::ClearRect { rect } => canvas.clear_rect(*rect),
            ServerEvent::DrawOval { rect } => canvas.draw_oval(*rect),
            ServerEvent::FillOval { rect } => canvas.fill_oval(*rect),
            ServerEvent::DrawPolyline { points } => canvas.draw_polyline(points),
            ServerEvent::FillPolygon { points } => canvas.fill_polygon(points),
            ServerEvent::DrawString {
                text,
                x,
                y,
                desired_width,
            } => canvas.draw_string(text, *x, *y, *desired_width),
            ServerEvent::CopyArea { rect, dx, dy } => canvas.copy_area(*rect, *dx, *dy),
            ServerEvent::DrawImage {
                image_id,
                x,
                y,
                scale_to,
            } => match images.get_image_data(image_id) {
                Some(ImageHandle::Bitmap(bitmap)) => canvas.draw_image(&bitmap, *x, *y, *scale_to),
                Some(ImageHandle::Offscreen(handle, _)) if Some(handle) == self.owner => {
                    warn!(
                        target = "replay::processor",
                        handle, "off-screen target drawing itself; skipping"
                    );
                }
                Some(ImageHandle::Offscreen(_, surface)) => {
                    let surface = surface.lock();
                    canvas.draw_image(surface.image(), *x, *y, *scale_to);
                }
                None => {
                    debug!(
                        target = "replay::processor",
                        image = %image_id,
                        "image not available; skipping draw"
                    );
                }
            },
            ServerEvent::Unsupported { name } => {
                if self.log_unsupported {
                    debug!(
                        target = "replay::processor",
                        event = %name,
                        "ignoring unsupported paint event"
                    );
                }
            }
            ServerEvent::SetPaint { .. }
            | ServerEvent::SetFont { .. }
            | ServerEvent::SetComposite { .. }
            | ServerEvent::SetClip { .. }
            | ServerEvent::SetStroke { .. }
            | ServerEvent::SetTransform { .. } => {
                self.apply_prerequisite(canvas, event);
            }
        }
    }
}
