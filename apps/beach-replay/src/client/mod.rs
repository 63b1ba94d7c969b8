//! The replay pipeline for one connection.
//!
//! A [`ReplaySession`] owns everything downstream of the socket: the
//! negotiated codecs, the double-buffered surface, the image cache and the
//! speculative overlay. Server frames are handled strictly in arrival order;
//! [`ReplaySession::tick`] flushes, sweeps the cache and produces the
//! upstream frame, if there is anything to say.

pub mod capture;
pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::cache::ImageCache;
use crate::codec::ConnectionCodecs;
use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::negotiation::{NegotiatedProtocol, VersionNegotiator};
use crate::optimizer::shrink_by_paint_events;
use crate::overlay::SpeculativeInputOverlay;
use crate::protocol::{
    ClientMessage, DisplayDescription, HandshakeReply, KeyPress, PaintTarget, ServerMessage,
};
use crate::render::{
    GlyphRasterizer, PaintProcessor, PresentTarget, RenderingSurface, canvas_size_allowed,
};
use crate::telemetry::logging::hexdump;

pub use capture::{CaptureSummary, replay_capture};
pub use transport::{read_frame, read_json, write_frame, write_json};

/// Default cadence of [`ReplaySession::run`]'s flush/sweep tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);

/// Client half of the handshake: send the hello, read and validate the
/// host's reply.
pub async fn handshake<S>(
    stream: &mut S,
    negotiator: &VersionNegotiator,
    displays: Vec<DisplayDescription>,
    token: Option<String>,
    max_frame_bytes: usize,
) -> Result<NegotiatedProtocol, ReplayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = negotiator.client_hello(displays, token);
    write_json(stream, &hello, max_frame_bytes).await?;
    let reply: HandshakeReply = read_json(stream, max_frame_bytes).await?;
    let negotiated = negotiator.accept(reply)?;
    info!(
        target = "replay::client",
        release = %negotiated.version.release,
        to_client = ?negotiated.to_client,
        to_server = ?negotiated.to_server,
        "connected"
    );
    Ok(negotiated)
}

pub struct ReplaySession<T> {
    config: ReplayConfig,
    negotiated: NegotiatedProtocol,
    codecs: ConnectionCodecs,
    surface: RenderingSurface<T>,
    processor: PaintProcessor,
    images: ImageCache,
    overlay: SpeculativeInputOverlay,
    outbound: Vec<ClientMessage>,
}

impl<T: PresentTarget> ReplaySession<T> {
    /// Builds the pipeline for an already negotiated connection. Must be
    /// called from within a tokio runtime; image decodes run on it.
    pub fn new(
        config: ReplayConfig,
        negotiated: NegotiatedProtocol,
        target: T,
        glyphs: Arc<dyn GlyphRasterizer>,
    ) -> Result<Self, ReplayError> {
        let images = ImageCache::from_current(&config)?.with_glyphs(Arc::clone(&glyphs));
        let codecs = ConnectionCodecs::from_negotiated(&negotiated, config.max_frame_bytes);
        Ok(Self {
            surface: RenderingSurface::new(target, 0, 0, Arc::clone(&glyphs)),
            processor: PaintProcessor::new(config.log_unsupported_events),
            overlay: SpeculativeInputOverlay::new(glyphs, config.speculative_timeout),
            outbound: Vec::new(),
            images,
            codecs,
            negotiated,
            config,
        })
    }

    /// Handshake over `stream`, then build the pipeline.
    pub async fn connect<S>(
        stream: &mut S,
        negotiator: &VersionNegotiator,
        config: ReplayConfig,
        target: T,
        glyphs: Arc<dyn GlyphRasterizer>,
    ) -> Result<Self, ReplayError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let negotiated =
            handshake(stream, negotiator, Vec::new(), None, config.max_frame_bytes).await?;
        Self::new(config, negotiated, target, glyphs)
    }

    pub fn negotiated(&self) -> &NegotiatedProtocol {
        &self.negotiated
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn surface(&self) -> &RenderingSurface<T> {
        &self.surface
    }

    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    pub fn overlay(&self) -> &SpeculativeInputOverlay {
        &self.overlay
    }

    /// The back buffer as of the last handled frame.
    pub fn snapshot(&self) -> &RgbaImage {
        self.surface.buffer_image()
    }

    /// Decodes one frame and applies every message in it. Decode failures
    /// are returned; the connection cannot recover from them.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<(), ReplayError> {
        let messages = match self.codecs.to_client.decode_server_frame(frame) {
            Ok(messages) => messages,
            Err(err) => {
                warn!(target = "replay::client", error = %err, len = frame.len(), "undecodable frame");
                trace!(
                    target = "replay::client",
                    "frame head:\n{}",
                    hexdump(&frame[..frame.len().min(256)])
                );
                return Err(err.into());
            }
        };
        for message in messages {
            self.handle_message(message);
        }
        Ok(())
    }

    pub fn handle_message(&mut self, message: ServerMessage) {
        trace!(target = "replay::client", message = message.label(), "handling");
        match message {
            ServerMessage::DrawCommands { target, events } => {
                let bundles = shrink_by_paint_events(events);
                match target {
                    PaintTarget::Surface => {
                        self.processor
                            .process(self.surface.canvas(), &bundles, &self.images);
                    }
                    PaintTarget::Offscreen(target) => {
                        if let Some(offscreen) = self.images.get_offscreen_processor(&target) {
                            offscreen.lock().process(&bundles, &self.images);
                        }
                    }
                }
            }
            ServerMessage::ImageData { image_id, data } => {
                self.images.put_image_data(image_id, data);
            }
            ServerMessage::CaretInfo { change } => {
                if self.overlay.on_caret_info(change) {
                    // The target still shows the prediction.
                    self.surface.invalidate();
                }
            }
            ServerMessage::SurfaceBounds { width, height } => {
                if !canvas_size_allowed(width, height) {
                    warn!(
                        target = "replay::client",
                        width, height, "ignoring oversized surface bounds"
                    );
                    return;
                }
                debug!(target = "replay::client", width, height, "surface resized");
                self.surface.set_bounds(width, height);
                self.surface.invalidate();
            }
        }
    }

    /// Forwards a key to the host and, when it would visibly insert a
    /// glyph, shows a local prediction right away.
    pub fn key_pressed(&mut self, key: KeyPress, now: Instant) {
        self.outbound.push(ClientMessage::from(key));
        if let Some(frame) = self
            .overlay
            .on_key_press(key, self.surface.buffer_image(), now)
        {
            self.surface.present_overlay(&frame);
        }
    }

    /// Presents pending paint. A live prediction is composed on top, so
    /// fresh host paint never hides it.
    fn present(&mut self) -> bool {
        let overlay = &self.overlay;
        self.surface.flush_composed(|buffer| overlay.compose(buffer))
    }

    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.outbound
            .push(ClientMessage::ResizeSurface { width, height });
    }

    /// Periodic housekeeping. Returns the encoded upstream frame, if any
    /// message is pending.
    pub fn tick(&mut self, now: Instant) -> Result<Option<Vec<u8>>, ReplayError> {
        if self.overlay.expire(now) {
            self.surface.invalidate();
        }
        self.present();
        self.images.collect_garbage_at(now);
        self.outbound.extend(self.images.extract_images_to_request());
        if self.outbound.is_empty() {
            return Ok(None);
        }
        let messages = std::mem::take(&mut self.outbound);
        let frame = self.codecs.to_server.encode_client_frame(&messages)?;
        trace!(
            target = "replay::client",
            messages = messages.len(),
            bytes = frame.len(),
            "upstream frame"
        );
        Ok(Some(frame))
    }

    /// Drives the session until the host closes the stream. Key presses
    /// arriving on `keys` are echoed and forwarded; a closed `keys` channel
    /// just stops input.
    pub async fn run<S>(
        &mut self,
        stream: S,
        mut keys: mpsc::Receiver<KeyPress>,
        tick_every: Duration,
    ) -> Result<(), ReplayError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let max_frame_bytes = self.config.max_frame_bytes;
        let (mut reader, mut writer) = tokio::io::split(stream);

        // read_frame is not cancel-safe; keep it out of the select.
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let read_task = tokio::spawn(async move {
            loop {
                let result = read_frame(&mut reader, max_frame_bytes).await;
                let done = result.is_err();
                if frame_tx.send(result).await.is_err() || done {
                    break;
                }
            }
        });

        let mut ticker = time::interval(tick_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keys_open = true;

        let result = loop {
            tokio::select! {
                frame = frame_rx.recv() => match frame {
                    Some(Ok(frame)) => {
                        if let Err(err) = self.handle_frame(&frame) {
                            break Err(err);
                        }
                    }
                    Some(Err(ReplayError::ConnectionClosed)) | None => {
                        info!(target = "replay::client", "host closed the connection");
                        break Ok(());
                    }
                    Some(Err(err)) => break Err(err),
                },
                key = keys.recv(), if keys_open => match key {
                    Some(key) => self.key_pressed(key, Instant::now()),
                    None => keys_open = false,
                },
                _ = ticker.tick() => {
                    match self.tick(Instant::now()) {
                        Ok(Some(frame)) => {
                            if let Err(err) = write_frame(&mut writer, &frame, max_frame_bytes).await {
                                break Err(err);
                            }
                        }
                        Ok(None) => {}
                        Err(err) => break Err(err),
                    }
                }
            }
        };

        read_task.abort();
        self.present();
        result
    }

    /// Waits for outstanding image decodes.
    pub async fn settle(&self) {
        self.images.settle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::CodecChoice;
    use crate::protocol::{
        Argb, CaretGeometry, CaretInfoChange, CaretPosition, CompressionType, EncodingType,
        FontSpec, ImageData, ImageId, PaintValue, Rect, ServerEvent,
    };
    use crate::render::{BoxGlyphs, ImageTarget};

    fn negotiated() -> NegotiatedProtocol {
        let history = VersionNegotiator::default().history().clone();
        let choice = CodecChoice {
            compression: CompressionType::None,
            encoding: EncodingType::Json,
        };
        NegotiatedProtocol {
            version: history.current().cloned().expect("current release"),
            to_client: choice,
            to_server: choice,
        }
    }

    fn session() -> ReplaySession<ImageTarget> {
        ReplaySession::new(
            ReplayConfig::default(),
            negotiated(),
            ImageTarget::default(),
            Arc::new(BoxGlyphs),
        )
        .expect("session")
    }

    fn red_square() -> ServerMessage {
        ServerMessage::DrawCommands {
            target: PaintTarget::Surface,
            events: vec![
                ServerEvent::SetPaint {
                    paint: PaintValue::Color {
                        argb: Argb(0xFFFF_0000),
                    },
                },
                ServerEvent::FillRect {
                    rect: Rect::new(0, 0, 4, 4),
                },
            ],
        }
    }

    fn caret() -> CaretGeometry {
        CaretGeometry {
            editor_window_id: 1,
            carets: vec![CaretPosition { x: 4, y: 0 }],
            font: FontSpec {
                font_id: 0,
                size: 10,
            },
            line_height: 12,
            line_ascent: 9,
            editor_bounds: Rect::new(0, 0, 64, 16),
            scrollbar_width: 0,
            text_color: Argb::BLACK,
            background_color: Argb::WHITE,
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn draws_land_on_target_after_tick() {
        let mut session = session();
        session.handle_message(ServerMessage::SurfaceBounds {
            width: 8,
            height: 8,
        });
        session.handle_message(red_square());
        assert_eq!(session.surface().target().presents(), 0);

        assert!(session.tick(Instant::now()).expect("tick").is_none());
        assert_eq!(session.surface().target().presents(), 1);
        assert_eq!(
            session.surface().target().frame().get_pixel(1, 1).0,
            [255, 0, 0, 255]
        );

        session.tick(Instant::now()).expect("tick");
        assert_eq!(session.surface().target().presents(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn frames_decode_with_negotiated_codec() {
        let mut session = session();
        let frame = session
            .codecs
            .to_client
            .encode_server_frame(&[
                ServerMessage::SurfaceBounds {
                    width: 8,
                    height: 8,
                },
                red_square(),
            ])
            .expect("encode");
        session.handle_frame(&frame).expect("handled");
        assert_eq!(session.snapshot().get_pixel(3, 3).0, [255, 0, 0, 255]);
        assert!(session.handle_frame(b"\x00garbage").is_err());
    }

    #[test_timeout::tokio_timeout_test]
    async fn misses_become_upstream_requests() {
        let mut session = session();
        session.handle_message(ServerMessage::SurfaceBounds {
            width: 8,
            height: 8,
        });
        let id = ImageId::bitmap(7, 99);
        session.handle_message(ServerMessage::DrawCommands {
            target: PaintTarget::Surface,
            events: vec![ServerEvent::DrawImage {
                image_id: id.clone(),
                x: 0,
                y: 0,
                scale_to: None,
            }],
        });
        let frame = session
            .tick(Instant::now())
            .expect("tick")
            .expect("request frame");
        let sent = session
            .codecs
            .to_server
            .decode_client_frame(&frame)
            .expect("decode");
        assert_eq!(
            sent,
            vec![ClientMessage::RequestImageData {
                image_id: id.clone()
            }]
        );

        session.handle_message(ServerMessage::ImageData {
            image_id: id.clone(),
            data: ImageData::Empty,
        });
        session.settle().await;
        assert!(session.images().is_resolved(&id));
        assert!(session.tick(Instant::now()).expect("tick").is_none());
    }

    #[test_timeout::tokio_timeout_test]
    async fn caret_update_restores_buffer() {
        let mut session = session();
        session.handle_message(ServerMessage::SurfaceBounds {
            width: 64,
            height: 16,
        });
        session.tick(Instant::now()).expect("tick");
        session.handle_message(ServerMessage::CaretInfo {
            change: CaretInfoChange::Carets(caret()),
        });

        let now = Instant::now();
        session.key_pressed(KeyPress::plain('x'), now);
        assert!(session.overlay().is_predicting());
        assert_eq!(session.surface().target().presents(), 2);
        let upstream = session.tick(now).expect("tick").expect("key frame");
        assert_eq!(
            session
                .codecs
                .to_server
                .decode_client_frame(&upstream)
                .expect("decode"),
            vec![ClientMessage::KeyPress {
                ch: 'x',
                modifiers: 0
            }]
        );

        session.handle_message(ServerMessage::CaretInfo {
            change: CaretInfoChange::NoCarets,
        });
        assert!(session.surface().is_dirty());
        session.tick(now).expect("tick");
        assert_eq!(session.surface().target().presents(), 3);
        assert_eq!(session.surface().target().frame(), session.snapshot());
    }

    fn fill(argb: u32, rect: Rect) -> ServerMessage {
        ServerMessage::DrawCommands {
            target: PaintTarget::Surface,
            events: vec![
                ServerEvent::SetPaint {
                    paint: PaintValue::Color { argb: Argb(argb) },
                },
                ServerEvent::FillRect { rect },
            ],
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn host_paint_stays_visible_under_prediction() {
        const GREEN: [u8; 4] = [0, 255, 0, 255];
        const RED: [u8; 4] = [255, 0, 0, 255];
        const BLACK: [u8; 4] = [0, 0, 0, 255];
        let mut session = session();
        session.handle_message(ServerMessage::SurfaceBounds {
            width: 64,
            height: 16,
        });
        session.tick(Instant::now()).expect("tick");
        session.handle_message(ServerMessage::CaretInfo {
            change: CaretInfoChange::Carets(caret()),
        });

        let now = Instant::now();
        session.key_pressed(KeyPress::plain('x'), now);
        // Below the edited line, and on it right of the caret.
        session.handle_message(fill(0xFF00_FF00, Rect::new(40, 14, 4, 2)));
        session.handle_message(fill(0xFFFF_0000, Rect::new(20, 3, 2, 2)));
        session.tick(now).expect("tick");

        assert!(session.overlay().is_predicting());
        let frame = session.surface().target().frame();
        assert_eq!(frame.get_pixel(41, 15).0, GREEN);
        assert_eq!(frame.get_pixel(4, 5).0, BLACK);
        assert_eq!(frame.get_pixel(26, 3).0, RED);
        assert_eq!(session.snapshot().get_pixel(20, 3).0, RED);

        session.key_pressed(KeyPress::plain('y'), now);
        assert_eq!(session.overlay().predicted_len(), 2);
        let frame = session.surface().target().frame();
        assert_eq!(frame.get_pixel(41, 15).0, GREEN);
        assert_eq!(frame.get_pixel(4, 5).0, BLACK);
        assert_eq!(frame.get_pixel(10, 5).0, BLACK);
        assert_eq!(frame.get_pixel(32, 3).0, RED);
        assert_ne!(frame.get_pixel(26, 3).0, RED);
    }

    #[test_timeout::tokio_timeout_test]
    async fn oversized_bounds_are_ignored() {
        let mut session = session();
        session.handle_message(ServerMessage::SurfaceBounds {
            width: u32::MAX,
            height: u32::MAX,
        });
        assert_eq!(session.surface().size(), (0, 0));
    }
}
