//! Bare reachability diagnostic.
//!
//! A TCP connect to the source endpoint. This says nothing about whether the
//! transcoder can actually pull a stream; readiness of a stream is decided by
//! the readiness gate alone.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpStream;
use tracing::debug;

use super::Protocol;
use crate::{Error, Result};

/// Outcome of a reachability check.
#[derive(Debug, Clone, Serialize)]
pub struct ReachabilityReport {
    pub host: String,
    pub port: u16,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Extract `(host, port)` from a pull URL, defaulting the port by scheme.
pub(crate) fn endpoint(pull_url: &str) -> Result<(String, u16)> {
    let url = url::Url::parse(pull_url)
        .map_err(|e| Error::invalid_descriptor(format!("unparseable stream URL: {e}")))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::invalid_descriptor("stream URL has no host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url
        .port()
        .or_else(|| Protocol::from_scheme(url.scheme()).map(|p| p.default_port()))
        .ok_or_else(|| {
            Error::invalid_descriptor(format!("no default port for scheme {}", url.scheme()))
        })?;
    Ok((host, port))
}

/// Try a TCP connection to the endpoint of `pull_url` within `timeout`.
pub async fn check_reachable(pull_url: &str, timeout: Duration) -> Result<ReachabilityReport> {
    let (host, port) = endpoint(pull_url)?;
    let started = Instant::now();

    let outcome = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await;
    let report = match outcome {
        Ok(Ok(_stream)) => ReachabilityReport {
            host,
            port,
            reachable: true,
            latency_ms: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Ok(Err(e)) => ReachabilityReport {
            host,
            port,
            reachable: false,
            latency_ms: None,
            error: Some(e.to_string()),
        },
        Err(_) => ReachabilityReport {
            host,
            port,
            reachable: false,
            latency_ms: None,
            error: Some(format!("no answer within {}ms", timeout.as_millis())),
        },
    };

    debug!(
        host = %report.host,
        port = report.port,
        reachable = report.reachable,
        "Reachability check finished"
    );
    Ok(report)
}
