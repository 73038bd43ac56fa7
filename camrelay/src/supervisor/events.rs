//! Stream lifecycle events.

use serde::Serialize;

/// Broadcast channel capacity for lifecycle events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted over the lifetime of stream sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A transcoder process was spawned.
    Started {
        stream_id: String,
        session_id: String,
        pid: Option<u32>,
    },
    /// The first playable segment appeared.
    Ready {
        stream_id: String,
        session_id: String,
    },
    /// The session failed.
    Failed {
        stream_id: String,
        session_id: String,
        reason: String,
    },
    /// The session was stopped on request.
    Stopped {
        stream_id: String,
        session_id: String,
    },
    /// The idle sweep reclaimed the session.
    Reclaimed {
        stream_id: String,
        session_id: String,
        idle_secs: u64,
    },
}

impl StreamEvent {
    pub fn stream_id(&self) -> &str {
        match self {
            Self::Started { stream_id, .. }
            | Self::Ready { stream_id, .. }
            | Self::Failed { stream_id, .. }
            | Self::Stopped { stream_id, .. }
            | Self::Reclaimed { stream_id, .. } => stream_id,
        }
    }

    /// Event name as used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Ready { .. } => "ready",
            Self::Failed { .. } => "failed",
            Self::Stopped { .. } => "stopped",
            Self::Reclaimed { .. } => "reclaimed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StreamEvent::Failed {
            stream_id: "cam1".into(),
            session_id: "abc".into(),
            reason: "connect failed: Connection refused".into(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["stream_id"], "cam1");
        assert_eq!(event.kind(), "failed");
        assert_eq!(event.stream_id(), "cam1");
    }
}
