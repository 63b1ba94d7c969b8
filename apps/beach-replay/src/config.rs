use std::env;
use std::str::FromStr;
#[cfg(test)]
use std::sync::Mutex;
use std::time::Duration;

use tracing::warn;

pub const IMAGE_TTL_ENV: &str = "BEACH_REPLAY_IMAGE_TTL_MS";
pub const IMAGE_BUDGET_ENV: &str = "BEACH_REPLAY_IMAGE_BUDGET_BYTES";
pub const LOG_UNSUPPORTED_ENV: &str = "BEACH_REPLAY_LOG_UNSUPPORTED";
pub const SPECULATIVE_TIMEOUT_ENV: &str = "BEACH_REPLAY_SPECULATIVE_TIMEOUT_MS";
pub const MAX_FRAME_ENV: &str = "BEACH_REPLAY_MAX_FRAME_BYTES";

/// Replay tuning, passed explicitly to every component that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// How long a cached image survives without being drawn.
    pub image_ttl: Duration,
    /// Encoded bytes the image cache may hold before TTL eviction kicks in.
    pub image_cache_budget_bytes: u64,
    pub log_unsupported_events: bool,
    /// Age after which an unconfirmed speculative glyph is dropped.
    pub speculative_timeout: Duration,
    /// Largest frame accepted from the wire, before and after decompression.
    pub max_frame_bytes: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            image_ttl: Duration::from_secs(60),
            image_cache_budget_bytes: 64 * 1024 * 1024,
            log_unsupported_events: false,
            speculative_timeout: Duration::from_millis(500),
            max_frame_bytes: 32 * 1024 * 1024,
        }
    }
}

impl ReplayConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or malformed.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            image_ttl: env_parse::<u64>(IMAGE_TTL_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.image_ttl),
            image_cache_budget_bytes: env_parse(IMAGE_BUDGET_ENV)
                .unwrap_or(defaults.image_cache_budget_bytes),
            log_unsupported_events: env_flag(LOG_UNSUPPORTED_ENV)
                .unwrap_or(defaults.log_unsupported_events),
            speculative_timeout: env_parse::<u64>(SPECULATIVE_TIMEOUT_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.speculative_timeout),
            max_frame_bytes: env_parse(MAX_FRAME_ENV).unwrap_or(defaults.max_frame_bytes),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target = "replay::config", var = name, value = %raw, "ignoring malformed value");
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!(target = "replay::config", var = name, value = %raw, "ignoring malformed flag");
            None
        }
    }
}
