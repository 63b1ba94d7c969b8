//! Offline replay of a recorded host stream.
//!
//! A capture uses the live framing: the host's accepted handshake as a JSON
//! frame, followed by server frames in the negotiated codec until EOF.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncRead;
use tracing::{debug, info};

use super::ReplaySession;
use super::transport::{read_frame, read_json};
use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::negotiation::VersionNegotiator;
use crate::protocol::{HandshakeReply, ToClientHandshake};
use crate::render::{GlyphRasterizer, PresentTarget};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub frames: u64,
    pub bytes: u64,
}

/// Replays every frame of `reader` into a fresh session. Image decodes are
/// awaited at the end and the final frame is flushed.
pub async fn replay_capture<R, T>(
    reader: &mut R,
    negotiator: &VersionNegotiator,
    config: ReplayConfig,
    target: T,
    glyphs: Arc<dyn GlyphRasterizer>,
) -> Result<(ReplaySession<T>, CaptureSummary), ReplayError>
where
    R: AsyncRead + Unpin,
    T: PresentTarget,
{
    let header: ToClientHandshake = read_json(reader, config.max_frame_bytes).await?;
    let negotiated = negotiator.accept(HandshakeReply::Accepted(header))?;
    info!(
        target = "replay::capture",
        release = %negotiated.version.release,
        encoding = negotiated.to_client.encoding.label(),
        compression = negotiated.to_client.compression.label(),
        "replaying capture"
    );
    let max_frame_bytes = config.max_frame_bytes;
    let mut session = ReplaySession::new(config, negotiated, target, glyphs)?;
    let mut summary = CaptureSummary::default();
    loop {
        let frame = match read_frame(reader, max_frame_bytes).await {
            Ok(frame) => frame,
            Err(ReplayError::ConnectionClosed) => break,
            Err(err) => return Err(err),
        };
        summary.frames += 1;
        summary.bytes += frame.len() as u64;
        session.handle_frame(&frame)?;
    }
    session.settle().await;
    // Upstream requests have nowhere to go offline.
    let _ = session.tick(Instant::now())?;
    debug!(
        target = "replay::capture",
        frames = summary.frames,
        bytes = summary.bytes,
        "capture exhausted"
    );
    Ok((session, summary))
}
