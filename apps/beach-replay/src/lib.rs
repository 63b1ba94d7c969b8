//! Client core for replaying a remote host's drawing stream.
//!
//! The host sends batches of paint and state events; this crate negotiates
//! the wire protocol, decodes frames, replays the events onto a
//! double-buffered raster surface, resolves referenced images lazily and
//! previews typed characters before the host confirms them.

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod negotiation;
pub mod optimizer;
pub mod overlay;
pub mod protocol;
pub mod render;
pub mod telemetry;

pub use cache::ImageCache;
pub use client::ReplaySession;
pub use config::ReplayConfig;
pub use error::{CodecError, NegotiationError, ReplayError};
pub use negotiation::VersionNegotiator;
pub use optimizer::{StateAndPaint, shrink_by_paint_events};
pub use overlay::SpeculativeInputOverlay;
pub use render::RenderingSurface;
