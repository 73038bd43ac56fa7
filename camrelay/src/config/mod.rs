//! Service configuration.
//!
//! Values come from the process environment (after `.env` has been loaded by
//! the binary) and fall back to defaults suitable for a single-host deployment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Default directory that holds per-stream artifact directories.
pub const DEFAULT_MEDIA_DIR: &str = "./media";

/// Default URL prefix under which artifacts are served.
pub const DEFAULT_MEDIA_URL_PREFIX: &str = "/media";

/// Configuration for the transcode supervisor and its registry.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Root directory for stream artifacts.
    pub media_dir: PathBuf,
    /// URL prefix used when building manifest URLs.
    pub media_url_prefix: String,
    /// Directory for rolling log files.
    pub log_dir: String,
    /// Path or name of the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Target HLS segment duration in seconds.
    pub hls_segment_secs: u32,
    /// Number of segments kept in the rolling playlist window.
    pub hls_list_size: u32,
    /// Hard deadline for the first playable segment.
    pub ready_timeout: Duration,
    /// Artifact polling interval of the readiness gate.
    pub poll_interval: Duration,
    /// Sessions without activity for this long are reclaimed.
    pub idle_timeout: Duration,
    /// Interval of the idle sweep.
    pub sweep_interval: Duration,
    /// Time a transcoder gets to quit on its own before it is killed.
    pub kill_grace: Duration,
    /// Whether audio is transcoded when the request does not say.
    pub audio_default: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from(DEFAULT_MEDIA_DIR),
            media_url_prefix: DEFAULT_MEDIA_URL_PREFIX.to_string(),
            log_dir: "./logs".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            hls_segment_secs: 2,
            hls_list_size: 5,
            ready_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(15),
            kill_grace: Duration::from_millis(2000),
            audio_default: false,
        }
    }
}

impl StreamConfig {
    /// Load the configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `MEDIA_DIR`, `MEDIA_URL_PREFIX`, `LOG_DIR`, `FFMPEG_PATH`
    /// - `HLS_SEGMENT_SECS`, `HLS_LIST_SIZE`
    /// - `STREAM_READY_TIMEOUT_SECS`, `STREAM_POLL_INTERVAL_MS`
    /// - `STREAM_IDLE_TIMEOUT_SECS`, `STREAM_SWEEP_INTERVAL_SECS`
    /// - `STREAM_KILL_GRACE_MS`, `STREAM_AUDIO_DEFAULT`
    pub fn from_env_or_default() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("MEDIA_DIR") {
            config.media_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = get("MEDIA_URL_PREFIX") {
            config.media_url_prefix = prefix.trim_end_matches('/').to_string();
        }
        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = dir;
        }
        if let Some(path) = get("FFMPEG_PATH") {
            config.ffmpeg_path = path;
        }
        if let Some(v) = get("HLS_SEGMENT_SECS") {
            config.hls_segment_secs = parse_var("HLS_SEGMENT_SECS", &v)?;
        }
        if let Some(v) = get("HLS_LIST_SIZE") {
            config.hls_list_size = parse_var("HLS_LIST_SIZE", &v)?;
        }
        if let Some(v) = get("STREAM_READY_TIMEOUT_SECS") {
            config.ready_timeout = Duration::from_secs(parse_var("STREAM_READY_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("STREAM_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(parse_var("STREAM_POLL_INTERVAL_MS", &v)?);
        }
        if let Some(v) = get("STREAM_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(parse_var("STREAM_IDLE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("STREAM_SWEEP_INTERVAL_SECS") {
            config.sweep_interval =
                Duration::from_secs(parse_var("STREAM_SWEEP_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("STREAM_KILL_GRACE_MS") {
            config.kill_grace = Duration::from_millis(parse_var("STREAM_KILL_GRACE_MS", &v)?);
        }
        if let Some(v) = get("STREAM_AUDIO_DEFAULT") {
            config.audio_default = parse_var("STREAM_AUDIO_DEFAULT", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the supervisor cannot work with.
    pub fn validate(&self) -> Result<()> {
        let prefix = &self.media_url_prefix;
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.contains(['{', '}']) {
            return Err(Error::config(format!(
                "MEDIA_URL_PREFIX must be an absolute path other than '/', got {prefix:?}"
            )));
        }
        if self.hls_segment_secs == 0 {
            return Err(Error::config("HLS_SEGMENT_SECS must be greater than 0"));
        }
        if self.hls_list_size == 0 {
            return Err(Error::config("HLS_LIST_SIZE must be greater than 0"));
        }
        if self.poll_interval.is_zero() || self.poll_interval >= Duration::from_secs(1) {
            return Err(Error::config(
                "STREAM_POLL_INTERVAL_MS must be between 1 and 999",
            ));
        }
        if self.ready_timeout.is_zero() {
            return Err(Error::config("STREAM_READY_TIMEOUT_SECS must be greater than 0"));
        }
        if self.idle_timeout.is_zero() || self.idle_timeout < self.ready_timeout {
            return Err(Error::config(
                "STREAM_IDLE_TIMEOUT_SECS must be at least STREAM_READY_TIMEOUT_SECS",
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::config("STREAM_SWEEP_INTERVAL_SECS must be greater than 0"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{key} has an invalid value: {value:?}")))
}
