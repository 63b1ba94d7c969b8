mod images;
mod living;
mod offscreen;

pub use images::{GcReport, ImageCache, ImageHandle};
pub use living::LivingEntity;
pub use offscreen::OffscreenSurface;
