//! Stream session handle.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::events::StreamEvent;
use super::state::{Failure, SessionEvent, SessionMachine, SessionState, Transition};
use crate::Error;
use crate::source::redact_url;

/// One transcode session for a logical stream.
///
/// The transcoder process itself lives in the session's monitor task; the
/// session holds the token that asks the monitor to terminate it and the token
/// the monitor fires once the process is reaped and the artifacts are gone.
#[derive(Debug)]
pub struct StreamSession {
    stream_id: String,
    session_id: String,
    source_url: String,
    artifact_dir: PathBuf,
    audio: bool,
    started_at: DateTime<Utc>,
    created: Instant,
    pid: OnceLock<u32>,
    machine: Mutex<SessionMachine>,
    state_tx: watch::Sender<SessionState>,
    last_activity: Mutex<Instant>,
    /// Termination request for the monitor task.
    terminate: CancellationToken,
    /// Fired by the monitor task when it is done.
    exited: CancellationToken,
    events: broadcast::Sender<StreamEvent>,
}

impl StreamSession {
    pub(crate) fn new(
        stream_id: impl Into<String>,
        session_id: impl Into<String>,
        source_url: impl Into<String>,
        artifact_dir: PathBuf,
        audio: bool,
        events: broadcast::Sender<StreamEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Starting);
        Self {
            stream_id: stream_id.into(),
            session_id: session_id.into(),
            source_url: source_url.into(),
            artifact_dir,
            audio,
            started_at: Utc::now(),
            created: Instant::now(),
            pid: OnceLock::new(),
            machine: Mutex::new(SessionMachine::new()),
            state_tx,
            last_activity: Mutex::new(Instant::now()),
            terminate: CancellationToken::new(),
            exited: CancellationToken::new(),
            events,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Resolved pull URL. May embed credentials; use [`redact_url`] before logging.
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn audio(&self) -> bool {
        self.audio
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Monotonic time since the session was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    pub(crate) fn set_pid(&self, pid: u32) {
        let _ = self.pid.set(pid);
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes. The current state is readable immediately.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn failure(&self) -> Option<Failure> {
        self.machine.lock().failure().cloned()
    }

    /// Human-readable description of the last failure.
    pub fn last_error(&self) -> Option<String> {
        self.failure().map(|f| f.to_string())
    }

    /// Error a caller should see for a session in a terminal state.
    pub fn terminal_error(&self) -> Option<Error> {
        match self.state() {
            SessionState::Stopped => Some(Error::Stopped {
                stream_id: self.stream_id.clone(),
            }),
            SessionState::Failed => {
                let stream_id = self.stream_id.clone();
                Some(match self.failure() {
                    Some(Failure::ConnectFailed(reason)) => {
                        Error::ConnectFailed { stream_id, reason }
                    }
                    Some(Failure::TimedOut { timeout }) => Error::TimedOut { stream_id, timeout },
                    Some(Failure::ProcessCrashed(reason)) => {
                        Error::ProcessCrashed { stream_id, reason }
                    }
                    None => Error::ProcessCrashed {
                        stream_id,
                        reason: "unknown failure".to_string(),
                    },
                })
            }
            SessionState::Starting | SessionState::Ready => None,
        }
    }

    /// Feed an event into the state machine.
    pub(crate) fn apply(&self, event: SessionEvent) -> Option<Transition> {
        let transition = {
            let mut machine = self.machine.lock();
            let transition = machine.handle(&event)?;
            self.state_tx.send_replace(transition.to);
            transition
        };

        self.announce(&transition);
        Some(transition)
    }

    fn announce(&self, transition: &Transition) {
        let stream_id = self.stream_id.clone();
        let session_id = self.session_id.clone();

        let event = match (&transition.to, &transition.failure) {
            (SessionState::Ready, _) => {
                info!(
                    stream_id = %stream_id,
                    session_id = %session_id,
                    elapsed_ms = (Utc::now() - self.started_at).num_milliseconds(),
                    "Stream is ready"
                );
                StreamEvent::Ready {
                    stream_id,
                    session_id,
                }
            }
            (SessionState::Failed, failure) => {
                let reason = failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "unknown failure".to_string());
                warn!(
                    stream_id = %stream_id,
                    session_id = %session_id,
                    from = %transition.from,
                    source = %redact_url(&self.source_url),
                    "Stream failed: {}",
                    reason
                );
                StreamEvent::Failed {
                    stream_id,
                    session_id,
                    reason,
                }
            }
            (SessionState::Stopped, _) => {
                info!(
                    stream_id = %stream_id,
                    session_id = %session_id,
                    from = %transition.from,
                    "Stream stopped"
                );
                StreamEvent::Stopped {
                    stream_id,
                    session_id,
                }
            }
            (SessionState::Starting, _) => return,
        };

        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Record delivery or readiness activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub(crate) fn termination_token(&self) -> CancellationToken {
        self.terminate.clone()
    }

    /// Ask the monitor task to terminate the process.
    pub(crate) fn request_termination(&self) {
        self.terminate.cancel();
    }

    pub(crate) fn mark_exited(&self) {
        self.exited.cancel();
    }

    /// Whether the process has been reaped and the artifacts removed.
    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Wait until the process has been reaped and the artifacts removed.
    pub async fn wait_exited(&self) {
        self.exited.cancelled().await
    }
}
