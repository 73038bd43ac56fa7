//! Session state machine.
//!
//! Transitions are driven by discrete events coming from the monitor task, the
//! readiness gate and stop requests. The machine holds no I/O so every
//! transition can be exercised directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transcoder::{Diagnostic, DiagnosticKind};

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Transcoder spawned, no playable segment yet.
    Starting,
    /// Manifest and at least one segment are available.
    Ready,
    /// Transcoder failed; terminal.
    Failed,
    /// Stopped on request; terminal.
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that drive the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The readiness gate found a manifest and a playable segment.
    FirstSegment,
    /// A classified transcoder stderr line.
    Diagnostic(Diagnostic),
    /// The transcoder process exited without being asked to.
    Exited { code: Option<i32> },
    /// The start-up deadline passed without a playable segment.
    DeadlineElapsed { timeout: Duration },
    /// Explicit stop.
    StopRequested,
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The source could not be reached during start-up.
    ConnectFailed(String),
    /// No playable segment before the deadline.
    TimedOut { timeout: Duration },
    /// The transcoder died after the stream was ready.
    ProcessCrashed(String),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed(reason) => write!(f, "connect failed: {reason}"),
            Self::TimedOut { timeout } => {
                write!(f, "no playable segment within {}s", timeout.as_secs_f64())
            }
            Self::ProcessCrashed(reason) => write!(f, "transcoder crashed: {reason}"),
        }
    }
}

/// A state change produced by [`SessionMachine::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub failure: Option<Failure>,
}

/// Per-session state machine.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    /// Latest connection-class diagnostic, used as the failure reason.
    connect_hint: Option<String>,
    failure: Option<Failure>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Starting,
            connect_hint: None,
            failure: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn connect_hint(&self) -> Option<&str> {
        self.connect_hint.as_deref()
    }

    /// Apply an event. Returns the transition if the state changed.
    pub fn handle(&mut self, event: &SessionEvent) -> Option<Transition> {
        use SessionState::*;

        if self.state.is_terminal() {
            return None;
        }

        let (to, failure) = match (self.state, event) {
            (Starting, SessionEvent::FirstSegment) => (Ready, None),
            (Ready, SessionEvent::FirstSegment) => return None,

            (_, SessionEvent::Diagnostic(diagnostic)) => match diagnostic.kind {
                DiagnosticKind::Connect => {
                    self.connect_hint = Some(diagnostic.message.clone());
                    return None;
                }
                DiagnosticKind::Warning => return None,
                DiagnosticKind::Fatal => (Failed, Some(self.failure_for(&diagnostic.message))),
            },

            (_, SessionEvent::Exited { code }) => {
                let reason = match code {
                    Some(code) => format!("transcoder exited with code {code}"),
                    None => "transcoder was terminated by a signal".to_string(),
                };
                (Failed, Some(self.failure_for(&reason)))
            }

            (Starting, SessionEvent::DeadlineElapsed { timeout }) => {
                let failure = match &self.connect_hint {
                    Some(hint) => Failure::ConnectFailed(hint.clone()),
                    None => Failure::TimedOut { timeout: *timeout },
                };
                (Failed, Some(failure))
            }
            (Ready, SessionEvent::DeadlineElapsed { .. }) => return None,

            (_, SessionEvent::StopRequested) => (Stopped, None),

            (Failed | Stopped, _) => return None,
        };

        let transition = Transition {
            from: self.state,
            to,
            failure: failure.clone(),
        };
        self.state = to;
        self.failure = failure;
        Some(transition)
    }

    /// Failure reason for an unexpected end in the current state.
    fn failure_for(&self, reason: &str) -> Failure {
        match self.state {
            SessionState::Starting => Failure::ConnectFailed(
                self.connect_hint
                    .clone()
                    .unwrap_or_else(|| reason.to_string()),
            ),
            _ => Failure::ProcessCrashed(reason.to_string()),
        }
    }
}
