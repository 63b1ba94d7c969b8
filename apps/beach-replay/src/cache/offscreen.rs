use std::sync::Arc;

use image::RgbaImage;

use super::ImageCache;
use crate::optimizer::StateAndPaint;
use crate::protocol::OffscreenTarget;
use crate::render::{GlyphRasterizer, PaintProcessor, RasterCanvas};

/// Server-side virtual canvas mirrored locally, with its own drawing state.
#[derive(Debug)]
pub struct OffscreenSurface {
    target: OffscreenTarget,
    canvas: RasterCanvas,
    processor: PaintProcessor,
}

impl OffscreenSurface {
    pub fn new(
        target: OffscreenTarget,
        glyphs: Arc<dyn GlyphRasterizer>,
        log_unsupported: bool,
    ) -> Self {
        Self {
            target,
            canvas: RasterCanvas::with_glyphs(target.width, target.height, glyphs),
            processor: PaintProcessor::for_offscreen(target.handle, log_unsupported),
        }
    }

    pub fn target(&self) -> OffscreenTarget {
        self.target
    }

    pub fn image(&self) -> &RgbaImage {
        self.canvas.image()
    }

    pub fn process(&mut self, bundles: &[StateAndPaint], images: &ImageCache) {
        let Self {
            canvas, processor, ..
        } = self;
        processor.process(canvas, bundles, images);
    }
}
