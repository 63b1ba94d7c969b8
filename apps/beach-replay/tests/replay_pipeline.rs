use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use beach_replay::client::{ReplaySession, read_frame, read_json, write_frame, write_json};
use beach_replay::codec::Codec;
use beach_replay::config::ReplayConfig;
use beach_replay::error::ReplayError;
use beach_replay::negotiation::{CodecChoice, VersionNegotiator};
use beach_replay::protocol::{
    Argb, ClientMessage, HandshakeReply, ImageData, ImageId, OffscreenTarget, PaintTarget,
    PaintValue, Rect, ServerEvent, ServerMessage, ToServerHandshake,
};
use beach_replay::render::{BoxGlyphs, ImageTarget};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

const MAX_FRAME: usize = 1 << 20;
const RED: [u8; 4] = [255, 0, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

/// Host half of a connection: codecs for both directions after answering
/// the client's hello.
struct Host {
    stream: DuplexStream,
    to_client: Codec,
    to_server: Codec,
}

impl Host {
    async fn accept(mut stream: DuplexStream) -> Self {
        let hello: ToServerHandshake = read_json(&mut stream, MAX_FRAME).await.expect("hello");
        let reply = VersionNegotiator::default().reply(&hello);
        write_json(&mut stream, &reply, MAX_FRAME).await.expect("reply");
        let HandshakeReply::Accepted(accepted) = reply else {
            panic!("host rejected a default client");
        };
        Self {
            stream,
            to_client: Codec::new(
                CodecChoice {
                    compression: accepted.to_client_compression,
                    encoding: accepted.to_client_encoding,
                },
                MAX_FRAME,
            ),
            to_server: Codec::new(
                CodecChoice {
                    compression: accepted.to_server_compression,
                    encoding: accepted.to_server_encoding,
                },
                MAX_FRAME,
            ),
        }
    }

    async fn send(&mut self, messages: &[ServerMessage]) {
        let frame = self.to_client.encode_server_frame(messages).expect("encode");
        write_frame(&mut self.stream, &frame, MAX_FRAME)
            .await
            .expect("send");
    }

    async fn receive(&mut self) -> Vec<ClientMessage> {
        let frame = read_frame(&mut self.stream, MAX_FRAME).await.expect("frame");
        self.to_server.decode_client_frame(&frame).expect("decode")
    }
}

fn fill(argb: u32, rect: Rect) -> Vec<ServerEvent> {
    vec![
        ServerEvent::SetPaint {
            paint: PaintValue::Color { argb: Argb(argb) },
        },
        ServerEvent::FillRect { rect },
    ]
}

fn draw_image(image_id: ImageId, x: i32, y: i32) -> ServerEvent {
    ServerEvent::DrawImage {
        image_id,
        x,
        y,
        scale_to: None,
    }
}

fn blue_png() -> Vec<u8> {
    let image = RgbaImage::from_pixel(2, 2, Rgba(BLUE));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .expect("encode png");
    bytes
}

async fn connected() -> (ReplaySession<ImageTarget>, DuplexStream, Host) {
    let (mut client, host) = tokio::io::duplex(64 * 1024);
    let host = tokio::spawn(Host::accept(host));
    let session = ReplaySession::connect(
        &mut client,
        &VersionNegotiator::default(),
        ReplayConfig::default(),
        ImageTarget::default(),
        Arc::new(BoxGlyphs),
    )
    .await
    .expect("connect");
    (session, client, host.await.expect("host task"))
}

/// Reads one frame off the client end and applies it.
async fn pump(session: &mut ReplaySession<ImageTarget>, client: &mut DuplexStream) {
    let frame = read_frame(client, MAX_FRAME).await.expect("frame");
    session.handle_frame(&frame).expect("handle");
}

#[test_timeout::tokio_timeout_test]
async fn missing_image_is_requested_and_drawn_on_redraw() {
    let (mut session, mut client, mut host) = connected().await;
    let id = ImageId::bitmap(42, 0xfeed);
    let draw = ServerMessage::DrawCommands {
        target: PaintTarget::Surface,
        events: vec![draw_image(id.clone(), 4, 4)],
    };

    host.send(&[
        ServerMessage::SurfaceBounds {
            width: 16,
            height: 16,
        },
        draw.clone(),
    ])
    .await;
    pump(&mut session, &mut client).await;

    let upstream = session.tick(Instant::now()).expect("tick").expect("request");
    let requests = host.to_server.decode_client_frame(&upstream).expect("decode");
    assert_eq!(
        requests,
        vec![ClientMessage::RequestImageData {
            image_id: id.clone()
        }]
    );
    assert_eq!(session.snapshot().get_pixel(4, 4).0, [0, 0, 0, 0]);

    host.send(&[ServerMessage::ImageData {
        image_id: id.clone(),
        data: ImageData::Encoded { bytes: blue_png() },
    }])
    .await;
    pump(&mut session, &mut client).await;
    session.settle().await;
    assert!(session.images().is_resolved(&id));
    assert!(session.tick(Instant::now()).expect("tick").is_none());

    host.send(&[draw]).await;
    pump(&mut session, &mut client).await;
    assert!(session.tick(Instant::now()).expect("tick").is_none());
    let frame = session.surface().target().frame();
    assert_eq!(frame.get_pixel(5, 5).0, BLUE);
    assert_eq!(frame.get_pixel(6, 6).0, [0, 0, 0, 0]);
}

#[test_timeout::tokio_timeout_test]
async fn offscreen_target_is_composed_onto_surface() {
    let (mut session, mut client, mut host) = connected().await;
    let target = OffscreenTarget {
        handle: 9,
        width: 4,
        height: 4,
    };
    host.send(&[
        ServerMessage::SurfaceBounds {
            width: 12,
            height: 12,
        },
        ServerMessage::DrawCommands {
            target: PaintTarget::Offscreen(target),
            events: fill(0xFFFF_0000, Rect::new(0, 0, 4, 4)),
        },
        ServerMessage::DrawCommands {
            target: PaintTarget::Surface,
            events: vec![draw_image(ImageId::Offscreen { handle: 9 }, 8, 8)],
        },
    ])
    .await;
    pump(&mut session, &mut client).await;

    assert_eq!(session.snapshot().get_pixel(9, 9).0, RED);
    assert_eq!(session.snapshot().get_pixel(7, 7).0, [0, 0, 0, 0]);
    // Off-screen sources are local; nothing goes upstream.
    assert!(session.tick(Instant::now()).expect("tick").is_none());
}

#[test_timeout::tokio_timeout_test]
async fn run_loop_flushes_and_sends_requests() {
    let (mut session, client, mut host) = connected().await;
    let id = ImageId::bitmap(1, 1);
    let host_task = tokio::spawn(async move {
        host.send(&[
            ServerMessage::SurfaceBounds {
                width: 8,
                height: 8,
            },
            ServerMessage::DrawCommands {
                target: PaintTarget::Surface,
                events: {
                    let mut events = fill(0xFFFF_0000, Rect::new(0, 0, 8, 8));
                    events.push(draw_image(ImageId::bitmap(1, 1), 0, 0));
                    events
                },
            },
        ])
        .await;
        let requests = host.receive().await;
        // Closing the stream ends the client's run loop.
        drop(host);
        requests
    });

    let (_keys_tx, keys_rx) = mpsc::channel(4);
    session
        .run(client, keys_rx, Duration::from_millis(5))
        .await
        .expect("run");

    let requests = host_task.await.expect("host task");
    assert_eq!(requests, vec![ClientMessage::RequestImageData { image_id: id }]);
    assert_eq!(session.surface().target().frame().get_pixel(3, 3).0, RED);
    assert!(session.surface().target().presents() >= 1);
}

#[test_timeout::tokio_timeout_test]
async fn rejected_handshake_fails_connect() {
    let (mut client, mut host) = tokio::io::duplex(4096);
    let host_task = tokio::spawn(async move {
        let _: ToServerHandshake = read_json(&mut host, MAX_FRAME).await.expect("hello");
        let reply = HandshakeReply::Rejected {
            reason: "maintenance".into(),
        };
        write_json(&mut host, &reply, MAX_FRAME).await.expect("reply");
    });
    let result = ReplaySession::connect(
        &mut client,
        &VersionNegotiator::default(),
        ReplayConfig::default(),
        ImageTarget::default(),
        Arc::new(BoxGlyphs),
    )
    .await;
    host_task.await.expect("host task");
    match result {
        Err(ReplayError::Negotiation(err)) => assert!(err.to_string().contains("maintenance")),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("connect succeeded against a rejecting host"),
    }
}
