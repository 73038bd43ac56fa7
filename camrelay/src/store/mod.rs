//! On-disk artifact store.
//!
//! Layout: `<root>/<stream_id>/<session_id>/{index.m3u8, segment_NNNNN.ts}`.
//! Each session owns its directory exclusively and removes it on teardown.

mod readiness;

pub use readiness::{Readiness, await_ready};

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::transcoder::MANIFEST_NAME;
use crate::{Error, Result};

/// Maximum length of a stream id.
const MAX_STREAM_ID_LEN: usize = 128;

/// Segment file extensions counted as playable.
const SEGMENT_EXTENSIONS: &[&str] = &["ts", "m4s"];

/// Snapshot of a session directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactProbe {
    /// Size of the manifest, 0 when missing.
    pub manifest_bytes: u64,
    /// Number of non-empty segment files.
    pub segments: usize,
}

impl ArtifactProbe {
    /// Manifest present and non-empty, plus at least one segment.
    pub fn is_playable(&self) -> bool {
        self.manifest_bytes > 0 && self.segments > 0
    }
}

/// Media root holding per-stream artifact directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stream ids become directory names, so only a conservative character
    /// set is accepted.
    pub fn validate_stream_id(stream_id: &str) -> Result<()> {
        if stream_id.is_empty() {
            return Err(Error::invalid_descriptor("stream id is empty"));
        }
        if stream_id.len() > MAX_STREAM_ID_LEN {
            return Err(Error::invalid_descriptor(format!(
                "stream id longer than {MAX_STREAM_ID_LEN} characters"
            )));
        }
        if stream_id == "." || stream_id == ".." {
            return Err(Error::invalid_descriptor("stream id is a relative path"));
        }
        if let Some(c) = stream_id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(Error::invalid_descriptor(format!(
                "stream id contains invalid character {c:?}"
            )));
        }
        Ok(())
    }

    pub fn stream_dir(&self, stream_id: &str) -> PathBuf {
        self.root.join(stream_id)
    }

    /// Create a fresh directory for a session.
    ///
    /// Synchronous so the directory exists before the transcoder is spawned.
    pub fn create_session_dir(&self, stream_id: &str, session_id: &str) -> Result<PathBuf> {
        let dir = self.stream_dir(stream_id).join(session_id);
        std::fs::create_dir_all(&dir).map_err(|e| Error::io_path("creating", &dir, e))?;
        debug!(path = %dir.display(), "Created session directory");
        Ok(dir)
    }

    /// Remove a session directory, then its stream directory if empty.
    pub async fn remove_session_dir(&self, dir: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => debug!(path = %dir.display(), "Removed session directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_path("removing", dir, e)),
        }

        // Fails harmlessly while another session of the stream still has files
        if let Some(parent) = dir.parent()
            && parent != self.root
        {
            let _ = tokio::fs::remove_dir(parent).await;
        }
        Ok(())
    }

    /// Inspect a session directory.
    pub async fn probe(dir: &Path) -> Result<ArtifactProbe> {
        let manifest_bytes = match tokio::fs::metadata(dir.join(MANIFEST_NAME)).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(Error::io_path("probing", dir, e)),
        };

        let mut segments = 0;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ArtifactProbe {
                    manifest_bytes,
                    segments,
                });
            }
            Err(e) => return Err(Error::io_path("reading", dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_path("reading", dir, e))?
        {
            let path = entry.path();
            let is_segment = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SEGMENT_EXTENSIONS.contains(&ext));
            if !is_segment {
                continue;
            }
            // Segments may rotate out between listing and stat
            if let Ok(meta) = entry.metadata().await
                && meta.is_file()
                && meta.len() > 0
            {
                segments += 1;
            }
        }

        Ok(ArtifactProbe {
            manifest_bytes,
            segments,
        })
    }

    /// Remove everything under the media root.
    ///
    /// Called once at startup, before any session exists; whatever is there
    /// was left behind by a previous run.
    pub async fn purge_orphans(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.root)
                    .await
                    .map_err(|e| Error::io_path("creating", &self.root, e))?;
                return Ok(0);
            }
            Err(e) => return Err(Error::io_path("reading", &self.root, e)),
        };

        let mut purged = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_path("reading", &self.root, e))?
        {
            let path = entry.path();
            let result = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => purged += 1,
                Err(e) => warn!(path = %path.display(), "Failed to purge orphaned artifact: {}", e),
            }
        }

        if purged > 0 {
            info!(root = %self.root.display(), purged, "Purged orphaned artifacts");
        }
        Ok(purged)
    }
}
