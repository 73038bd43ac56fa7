//! API request and response models (DTOs).

use serde::{Deserialize, Serialize};

use crate::registry::StreamStatus;
use crate::source::{CameraDescriptor, ReachabilityReport};

// ============================================================================
// Streams
// ============================================================================

/// Request body for starting (or joining) a stream.
///
/// ```json
/// {
///     "source": {"address": "10.0.0.5", "vendor": "hikvision"},
///     "audio": false
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct StartStreamRequest {
    pub source: CameraDescriptor,
    /// Transcode audio too; the service default applies when absent.
    #[serde(default)]
    pub audio: Option<bool>,
}

/// Response for the stream list.
#[derive(Debug, Clone, Serialize)]
pub struct StreamListResponse {
    /// Ids of streams with a starting or ready session.
    pub active: Vec<String>,
    /// Every session in the registry, including ones that just ended.
    pub items: Vec<StreamStatus>,
    pub total: usize,
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Request body for a reachability check.
#[derive(Debug, Clone, Deserialize)]
pub struct ReachabilityRequest {
    pub source: CameraDescriptor,
    /// Connect timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Reachability check result.
#[derive(Debug, Clone, Serialize)]
pub struct ReachabilityResponse {
    /// Resolved pull URL with credentials redacted.
    pub source: String,
    #[serde(flatten)]
    pub report: ReachabilityReport,
}

// ============================================================================
// Logging
// ============================================================================

/// Request to update the log filter.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

/// Information about an available logging module.
#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

/// Response for logging configuration.
#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_streams: usize,
    pub components: Vec<ComponentHealth>,
}

/// Component health status.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
