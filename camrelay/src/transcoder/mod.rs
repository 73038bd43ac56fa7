//! Transcoder abstraction.
//!
//! A transcoder turns a pull URL into a rolling HLS window inside a session's
//! artifact directory. The supervisor owns spawning and termination; a
//! transcoder only describes the command line and how to read its output.

mod diagnostics;
mod ffmpeg;

pub use diagnostics::{Diagnostic, DiagnosticKind, classify};
pub use ffmpeg::{FfmpegConfig, FfmpegTranscoder};

use std::path::PathBuf;

use tokio::process::Command;

/// File name of the HLS manifest inside an artifact directory.
pub const MANIFEST_NAME: &str = "index.m3u8";

/// Segment file name pattern (ffmpeg `%05d` numbering).
pub const SEGMENT_PATTERN: &str = "segment_%05d.ts";

/// A single transcode job.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Logical stream id, for logging.
    pub stream_id: String,
    /// Resolved pull URL. May embed credentials.
    pub pull_url: String,
    /// Directory receiving the manifest and segments.
    pub output_dir: PathBuf,
    /// Whether to carry an audio track.
    pub audio: bool,
}

impl TranscodeJob {
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_NAME)
    }

    pub fn segment_path_pattern(&self) -> PathBuf {
        self.output_dir.join(SEGMENT_PATTERN)
    }
}

/// Trait for transcoder backends.
pub trait Transcoder: Send + Sync {
    /// Short backend name used in logs and health output.
    fn name(&self) -> &str;

    /// Version string, `None` when the binary is missing or not executable.
    fn version(&self) -> Option<String>;

    /// Check if the transcoder can be used.
    fn is_available(&self) -> bool {
        self.version().is_some()
    }

    /// Build the command for a job.
    ///
    /// The returned command must be fully configured (arguments, stdio); the
    /// supervisor spawns it as is.
    fn command(&self, job: &TranscodeJob) -> Command;

    /// Bytes written to stdin to ask the process to quit cleanly.
    fn quit_sequence(&self) -> Option<&'static [u8]> {
        None
    }

    /// Classify a stderr line.
    fn classify(&self, line: &str) -> Option<Diagnostic> {
        classify(line)
    }
}
