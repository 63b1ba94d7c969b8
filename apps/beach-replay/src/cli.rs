use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use beach_replay::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "beach-replay",
    about = "Replay a remote host's drawing stream into a local frame",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Write the final frame to this PNG file"
    )]
    pub snapshot: Option<PathBuf>,

    #[arg(
        long = "print-metrics",
        global = true,
        help = "Print Prometheus metrics to stdout on exit"
    )]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "BEACH_REPLAY_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "BEACH_REPLAY_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a host and replay its stream until it disconnects
    Connect(ConnectArgs),
    /// Replay a recorded capture file
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Host address, e.g. 127.0.0.1:7420
    pub addr: String,

    #[arg(
        long,
        env = "BEACH_REPLAY_TOKEN",
        hide_env_values = true,
        help = "Authentication token sent with the handshake"
    )]
    pub token: Option<String>,

    #[arg(
        long = "tick-ms",
        default_value_t = 16,
        help = "Flush and cache sweep interval in milliseconds"
    )]
    pub tick_ms: u64,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Capture file: handshake frame followed by server frames
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn parses_connect_with_globals() {
        let cli = Cli::try_parse_from([
            "beach-replay",
            "connect",
            "127.0.0.1:7420",
            "--snapshot",
            "out.png",
            "--log-level",
            "debug",
        ])
        .expect("parse");
        assert_eq!(cli.logging.level, LogLevel::Debug);
        assert_eq!(cli.snapshot, Some(PathBuf::from("out.png")));
        match cli.command {
            Command::Connect(args) => {
                assert_eq!(args.addr, "127.0.0.1:7420");
                assert_eq!(args.tick_ms, 16);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn replay_requires_a_file() {
        assert!(Cli::try_parse_from(["beach-replay", "replay"]).is_err());
        let cli = Cli::try_parse_from(["beach-replay", "replay", "session.cap"]).expect("parse");
        assert!(matches!(cli.command, Command::Replay(args) if args.file == PathBuf::from("session.cap")));
    }
}
