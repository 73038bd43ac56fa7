//! Manifest and segment delivery.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Content type for anything not in the table.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A manifest or segment read from a session directory.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Content type for an artifact, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("m4s") => "video/iso.segment",
        Some("mp4") => "video/mp4",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// Check that a requested artifact path stays inside the session directory.
///
/// Only plain relative components are accepted; no filesystem access happens
/// here.
pub fn validate_artifact_path(requested: &str) -> Result<PathBuf> {
    if requested.is_empty() {
        return Err(Error::invalid_path("empty artifact path"));
    }
    if requested.contains('\0') {
        return Err(Error::invalid_path("artifact path contains NUL"));
    }
    // Backslashes are separators for some clients
    if requested.contains('\\') {
        return Err(Error::invalid_path(format!(
            "artifact path contains a backslash: {requested}"
        )));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::ParentDir => {
                return Err(Error::invalid_path(format!(
                    "parent traversal in artifact path: {requested}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::invalid_path(format!(
                    "absolute artifact path: {requested}"
                )));
            }
            Component::CurDir => {
                return Err(Error::invalid_path(format!(
                    "relative component in artifact path: {requested}"
                )));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(Error::invalid_path("empty artifact path"));
    }
    Ok(relative)
}

/// Read an artifact from a session directory.
///
/// `relative` must come from [`validate_artifact_path`].
pub async fn read_artifact(dir: &Path, relative: &Path) -> Result<Artifact> {
    let path = dir.join(relative);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Artifact {
            bytes,
            content_type: content_type_for(relative),
        }),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            ) =>
        {
            Err(Error::not_found(format!(
                "artifact {} not available",
                relative.display()
            )))
        }
        Err(e) if e.kind() == std::io::ErrorKind::IsADirectory => Err(Error::not_found(format!(
            "artifact {} is not a file",
            relative.display()
        ))),
        Err(e) => Err(Error::io_path("reading", &path, e)),
    }
}
