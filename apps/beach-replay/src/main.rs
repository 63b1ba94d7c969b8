mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbaImage;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::info;

use beach_replay::client::{ReplaySession, replay_capture};
use beach_replay::config::ReplayConfig;
use beach_replay::metrics;
use beach_replay::negotiation::VersionNegotiator;
use beach_replay::render::{BoxGlyphs, GlyphRasterizer, ImageTarget};
use beach_replay::telemetry::logging;
use cli::{Cli, Command, ConnectArgs, ReplayArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("initialising logging")?;
    let config = ReplayConfig::from_env();
    info!(target = "replay::main", ?config, "starting");

    let frame = match cli.command {
        Command::Connect(args) => connect(args, config).await?,
        Command::Replay(args) => replay(args, config).await?,
    };

    if let Some(path) = &cli.snapshot {
        save_snapshot(&frame, path)?;
    }
    if cli.print_metrics {
        print!("{}", metrics::gather_text());
    }
    Ok(())
}

fn glyphs() -> Arc<dyn GlyphRasterizer> {
    Arc::new(BoxGlyphs)
}

async fn connect(args: ConnectArgs, config: ReplayConfig) -> Result<RgbaImage> {
    let mut stream = TcpStream::connect(&args.addr)
        .await
        .with_context(|| format!("connecting to {}", args.addr))?;
    stream.set_nodelay(true).ok();

    let negotiator = VersionNegotiator::default();
    let negotiated = beach_replay::client::handshake(
        &mut stream,
        &negotiator,
        Vec::new(),
        args.token,
        config.max_frame_bytes,
    )
    .await
    .context("handshake")?;

    let mut session = ReplaySession::new(config, negotiated, ImageTarget::default(), glyphs())?;
    // No local keyboard source; input comes from embedders.
    let (_keys_tx, keys_rx) = mpsc::channel(1);
    session
        .run(stream, keys_rx, Duration::from_millis(args.tick_ms.max(1)))
        .await
        .context("replaying host stream")?;
    Ok(session.surface().target().frame().clone())
}

async fn replay(args: ReplayArgs, config: ReplayConfig) -> Result<RgbaImage> {
    let mut file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("opening capture {}", args.file.display()))?;
    let negotiator = VersionNegotiator::default();
    let (session, summary) =
        replay_capture(&mut file, &negotiator, config, ImageTarget::default(), glyphs())
            .await
            .with_context(|| format!("replaying {}", args.file.display()))?;
    info!(
        target = "replay::main",
        frames = summary.frames,
        bytes = summary.bytes,
        "capture replayed"
    );
    Ok(session.surface().target().frame().clone())
}

fn save_snapshot(frame: &RgbaImage, path: &Path) -> Result<()> {
    if frame.width() == 0 || frame.height() == 0 {
        anyhow::bail!("no frame was presented; nothing to write to {}", path.display());
    }
    frame
        .save(path)
        .with_context(|| format!("writing snapshot {}", path.display()))?;
    info!(target = "replay::main", path = %path.display(), "snapshot written");
    Ok(())
}
