//! Camera vendor and transport tags.

use serde::{Deserialize, Serialize};

/// Camera vendor tag selecting the default stream path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// Fallback for cameras without a known vendor layout.
    #[default]
    Generic,
    Hikvision,
    Dahua,
    Amcrest,
    Axis,
    Reolink,
    Uniview,
    Foscam,
    Tplink,
}

impl Vendor {
    /// All known vendor tags.
    pub const ALL: [Vendor; 9] = [
        Self::Generic,
        Self::Hikvision,
        Self::Dahua,
        Self::Amcrest,
        Self::Axis,
        Self::Reolink,
        Self::Uniview,
        Self::Foscam,
        Self::Tplink,
    ];

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Hikvision => "hikvision",
            Self::Dahua => "dahua",
            Self::Amcrest => "amcrest",
            Self::Axis => "axis",
            Self::Reolink => "reolink",
            Self::Uniview => "uniview",
            Self::Foscam => "foscam",
            Self::Tplink => "tplink",
        }
    }

    /// Default main-stream path for this vendor.
    pub fn default_path(&self) -> &'static str {
        match self {
            Self::Generic => "/stream",
            Self::Hikvision => "/Streaming/Channels/101",
            Self::Dahua | Self::Amcrest => "/cam/realmonitor?channel=1&subtype=0",
            Self::Axis => "/axis-media/media.amp",
            Self::Reolink => "/h264Preview_01_main",
            Self::Uniview => "/media/video1",
            Self::Foscam => "/videoMain",
            Self::Tplink => "/stream1",
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pull protocol used when the address is a bare host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Rtsp,
    Rtmp,
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Rtsp => "rtsp",
            Self::Rtmp => "rtmp",
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Well-known port of the protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Rtsp => 554,
            Self::Rtmp => 1935,
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    /// Map a URL scheme back to a protocol.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "rtsp" | "rtsps" => Some(Self::Rtsp),
            "rtmp" | "rtmps" => Some(Self::Rtmp),
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}
