//! Source resolution.
//!
//! Turns a camera descriptor handed over by the camera-management layer into the
//! exact URL the transcoder pulls from. Resolution is pure: no I/O, no state.

mod probe;
mod vendor;

pub use probe::{ReachabilityReport, check_reachable};
pub use vendor::{Protocol, Vendor};

use serde::Deserialize;

use crate::{Error, Result};

/// Logical description of a camera feed.
#[derive(Clone, Default, Deserialize)]
pub struct CameraDescriptor {
    /// Host (optionally `host:port`) or a fully qualified stream URL.
    pub address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Explicit port; wins over a port embedded in `address`.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub vendor: Vendor,
    /// Explicit stream path; wins over the vendor default.
    #[serde(default)]
    pub path: Option<String>,
}

impl CameraDescriptor {
    /// Create a descriptor for a bare address with all other fields defaulted.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_vendor(mut self, vendor: Vendor) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Both credential fields, if both are present and non-empty.
    fn credentials(&self) -> Option<(&str, &str)> {
        let user = self.username.as_deref().filter(|u| !u.is_empty())?;
        let pass = self.password.as_deref().filter(|p| !p.is_empty())?;
        Some((user, pass))
    }
}

impl std::fmt::Debug for CameraDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraDescriptor")
            .field("address", &redact_url(&self.address))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("vendor", &self.vendor)
            .field("path", &self.path)
            .finish()
    }
}

/// Resolve a descriptor into the pull URL handed to the transcoder.
///
/// Fully qualified addresses are returned unchanged. Bare hosts are expanded to
/// `scheme://[user:pass@]host:port/path`.
pub fn resolve(descriptor: &CameraDescriptor) -> Result<String> {
    let address = descriptor.address.trim();
    if address.is_empty() {
        return Err(Error::invalid_descriptor("address is empty"));
    }

    if has_scheme(address) {
        let parsed = url::Url::parse(address)
            .map_err(|e| Error::invalid_descriptor(format!("unparseable stream URL: {e}")))?;
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(Error::invalid_descriptor("stream URL has no host"));
        }
        return Ok(descriptor.address.clone());
    }

    let (host, address_port) = split_host_port(address)?;
    let protocol = descriptor.protocol;
    let port = descriptor
        .port
        .or(address_port)
        .unwrap_or_else(|| protocol.default_port());
    if port == 0 {
        return Err(Error::invalid_descriptor("port must be non-zero"));
    }

    let userinfo = descriptor
        .credentials()
        .map(|(user, pass)| {
            format!(
                "{}:{}@",
                urlencoding::encode(user),
                urlencoding::encode(pass)
            )
        })
        .unwrap_or_default();

    let path = match descriptor.path.as_deref().map(str::trim) {
        Some(path) if !path.is_empty() => normalize_path(path),
        _ => descriptor.vendor.default_path().to_string(),
    };

    let url = format!("{}://{userinfo}{host}:{port}{path}", protocol.scheme());
    url::Url::parse(&url)
        .map_err(|e| Error::invalid_descriptor(format!("cannot build stream URL: {e}")))?;
    Ok(url)
}

/// Replace the password of a URL with `***` for logging.
pub fn redact_url(url: &str) -> String {
    if !url.contains('@') {
        return url.to_string();
    }
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            // Only fails for URLs that cannot carry credentials, which this one does.
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<redacted>".to_string(),
    }
}

/// Whether the address starts with `scheme://`.
fn has_scheme(address: &str) -> bool {
    let Some((scheme, _)) = address.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn split_host_port(address: &str) -> Result<(String, Option<u16>)> {
    if address.contains(|c: char| c.is_whitespace() || matches!(c, '/' | '@' | '?' | '#')) {
        return Err(Error::invalid_descriptor(format!(
            "address {address:?} is neither a host nor a stream URL"
        )));
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (inner, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::invalid_descriptor("unterminated IPv6 address"))?;
        let port = match tail {
            "" => None,
            tail => Some(
                tail.strip_prefix(':')
                    .ok_or_else(|| Error::invalid_descriptor("garbage after IPv6 address"))?,
            ),
        };
        (format!("[{inner}]"), port)
    } else if address.parse::<std::net::Ipv6Addr>().is_ok() {
        (format!("[{address}]"), None)
    } else {
        match address.split_once(':') {
            Some((host, port)) => (host.to_string(), Some(port)),
            None => (address.to_string(), None),
        }
    };

    url::Host::parse(&host)
        .map_err(|e| Error::invalid_descriptor(format!("invalid host {host:?}: {e}")))?;

    let port = port
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| Error::invalid_descriptor(format!("invalid port {p:?}")))
        })
        .transpose()?;

    Ok((host, port))
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
