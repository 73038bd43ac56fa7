//! FFmpeg transcoder implementation.

use parking_lot::RwLock;
use process_utils::{std_command, supervised_command};
use tokio::process::Command;

use super::{TranscodeJob, Transcoder};
use crate::config::StreamConfig;

/// RTSP/RTMP socket timeout handed to ffmpeg, in microseconds.
const SOCKET_TIMEOUT_US: &str = "10000000";

/// FFmpeg transcoder configuration.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Path or name of the ffmpeg binary.
    pub binary_path: String,
    /// Target segment duration in seconds.
    pub segment_secs: u32,
    /// Number of segments kept in the playlist window.
    pub list_size: u32,
    /// Extra arguments placed before `-i`.
    pub input_args: Vec<String>,
    /// Extra arguments placed before the HLS muxer options.
    pub output_args: Vec<String>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            segment_secs: 2,
            list_size: 5,
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }
}

impl From<&StreamConfig> for FfmpegConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            binary_path: config.ffmpeg_path.clone(),
            segment_secs: config.hls_segment_secs,
            list_size: config.hls_list_size,
            ..Default::default()
        }
    }
}

/// FFmpeg-based HLS transcoder.
pub struct FfmpegTranscoder {
    /// Transcoder configuration.
    config: FfmpegConfig,
    /// Version string, cached once the binary has been found.
    version: RwLock<Option<String>>,
}

impl FfmpegTranscoder {
    /// Create a new FFmpeg transcoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(FfmpegConfig::default())
    }

    /// Create with a custom configuration.
    pub fn with_config(config: FfmpegConfig) -> Self {
        let version = RwLock::new(Self::detect_version(&config.binary_path));

        Self { config, version }
    }

    /// Detect ffmpeg version.
    fn detect_version(path: &str) -> Option<String> {
        std_command(path)
            .arg("-version")
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }

    /// Build ffmpeg command arguments.
    fn build_args(&self, job: &TranscodeJob) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        // 1. Quiet output: warnings and errors only, no progress lines
        push(&["-hide_banner", "-nostats", "-loglevel", "warning"]);

        // 2. Transport and reconnect options, depending on the source protocol
        let scheme = job
            .pull_url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();
        match scheme.as_str() {
            "rtsp" | "rtsps" => {
                push(&["-rtsp_transport", "tcp", "-timeout", SOCKET_TIMEOUT_US]);
            }
            "http" | "https" => {
                push(&[
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_on_network_error",
                    "1",
                    "-reconnect_delay_max",
                    "5",
                    "-rw_timeout",
                    SOCKET_TIMEOUT_US,
                ]);
            }
            _ => {
                push(&["-rw_timeout", SOCKET_TIMEOUT_US]);
            }
        }

        // 3. Extra input arguments from config
        args.extend(self.config.input_args.iter().cloned());

        // 4. Input URL
        args.extend(["-i".to_string(), job.pull_url.clone()]);

        // 5. Stream selection: first video track, optional audio
        args.extend(["-map".to_string(), "0:v:0".to_string()]);
        if job.audio {
            args.extend(
                ["-map", "0:a:0?", "-c:a", "aac", "-b:a", "128k", "-ac", "2"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        } else {
            args.push("-an".to_string());
        }

        // 6. Baseline H.264 with keyframes aligned to segment boundaries
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "baseline",
                "-level:v",
                "3.1",
                "-pix_fmt",
                "yuv420p",
                "-sc_threshold",
                "0",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.extend([
            "-force_key_frames".to_string(),
            format!("expr:gte(t,n_forced*{})", self.config.segment_secs),
        ]);

        // 7. Extra output arguments from config
        args.extend(self.config.output_args.iter().cloned());

        // 8. Rolling HLS window
        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.config.segment_secs.to_string(),
            "-hls_list_size".to_string(),
            self.config.list_size.to_string(),
            "-hls_flags".to_string(),
            "delete_segments+independent_segments+omit_endlist".to_string(),
            "-hls_allow_cache".to_string(),
            "0".to_string(),
            "-start_number".to_string(),
            "0".to_string(),
            "-hls_segment_filename".to_string(),
            job.segment_path_pattern().to_string_lossy().to_string(),
        ]);

        // Output path
        args.push(job.manifest_path().to_string_lossy().to_string());

        args
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    /// A missing binary is looked up again on every call, so installing
    /// ffmpeg does not need a restart.
    fn version(&self) -> Option<String> {
        if let Some(version) = self.version.read().as_ref() {
            return Some(version.clone());
        }

        let detected = Self::detect_version(&self.config.binary_path)?;
        *self.version.write() = Some(detected.clone());
        Some(detected)
    }

    fn command(&self, job: &TranscodeJob) -> Command {
        let mut cmd = supervised_command(&self.config.binary_path);
        cmd.args(self.build_args(job)).env("LC_ALL", "C"); // Force consistent output
        cmd
    }

    fn quit_sequence(&self) -> Option<&'static [u8]> {
        Some(b"q")
    }
}
