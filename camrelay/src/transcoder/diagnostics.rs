//! Transcoder stderr classification.
//!
//! ffmpeg reports connection problems and fatal errors as free-form lines on
//! stderr. The supervisor only needs to know which class a line belongs to.

/// Class of a diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// The source could not be reached or refused the credentials.
    Connect,
    /// The transcoder cannot continue; the session fails immediately.
    Fatal,
    /// Anything else that looks like an error. Logged only.
    Warning,
}

/// A classified diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

const CONNECT_PATTERNS: &[&str] = &[
    "Connection refused",
    "Connection timed out",
    "Connection reset by peer",
    "No route to host",
    "Network is unreachable",
    "Name or service not known",
    "Failed to resolve hostname",
    "nodename nor servname",
    "401 Unauthorized",
    "403 Forbidden",
    "404 Not Found",
    "method DESCRIBE failed",
    "method SETUP failed",
    "Server returned",
    "I/O error",
];

const FATAL_PATTERNS: &[&str] = &[
    "Invalid data found when processing input",
    "does not contain any stream",
    "Unknown encoder",
    "Encoder not found",
    "Error initializing output stream",
    "Could not write header",
    "No space left on device",
    "Unrecognized option",
];

/// Classify a transcoder stderr line.
///
/// Returns `None` for lines that carry no diagnostic value.
pub fn classify(line: &str) -> Option<Diagnostic> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let message = strip_component_prefix(line);

    if CONNECT_PATTERNS.iter().any(|p| line.contains(p)) {
        return Some(Diagnostic::new(DiagnosticKind::Connect, message));
    }
    if FATAL_PATTERNS.iter().any(|p| line.contains(p)) {
        return Some(Diagnostic::new(DiagnosticKind::Fatal, message));
    }
    if line.contains("Error") || line.contains("error") || line.contains("failed") {
        return Some(Diagnostic::new(DiagnosticKind::Warning, message));
    }

    None
}

/// Drop ffmpeg's `[component @ 0x...]` prefix.
fn strip_component_prefix(line: &str) -> &str {
    if line.starts_with('[')
        && let Some(end) = line.find("] ")
        && line[..end].contains(" @ ")
    {
        return line[end + 2..].trim();
    }
    line
}
