//! Readiness gate.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::ArtifactStore;
use crate::supervisor::{SessionEvent, SessionState, StreamSession};
use crate::{Error, Result};

/// Outcome of waiting for a session to become playable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

/// Wait until the session's manifest and first segment exist.
///
/// Level-triggered: a session that is already `Ready` returns immediately.
/// The artifact directory is probed every `poll_interval` while the session
/// state channel is watched, so a failure or stop wakes the waiter at once.
/// A pending waiter keeps the session from counting as idle.
///
/// `TimedOut` does not touch the session; deciding what to do with a session
/// that never became ready is up to the caller.
pub async fn await_ready(
    session: &StreamSession,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Readiness> {
    let mut state_rx = session.subscribe_state();
    let deadline = tokio::time::sleep_until(Instant::now() + timeout);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *state_rx.borrow_and_update() == SessionState::Ready {
            session.touch();
            return Ok(Readiness::Ready);
        }
        if let Some(err) = session.terminal_error() {
            return Err(err);
        }

        tokio::select! {
            _ = &mut deadline => {
                debug!(
                    stream_id = %session.stream_id(),
                    session_id = %session.session_id(),
                    "Readiness deadline elapsed"
                );
                return Ok(Readiness::TimedOut);
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return Err(Error::Stopped {
                        stream_id: session.stream_id().to_string(),
                    });
                }
            }
            _ = ticker.tick() => {
                session.touch();
                match ArtifactStore::probe(session.artifact_dir()).await {
                    Ok(probe) if probe.is_playable() => {
                        session.apply(SessionEvent::FirstSegment);
                    }
                    Ok(probe) => trace!(
                        stream_id = %session.stream_id(),
                        manifest_bytes = probe.manifest_bytes,
                        segments = probe.segments,
                        "Not playable yet"
                    ),
                    Err(e) => debug!(stream_id = %session.stream_id(), "Probe failed: {}", e),
                }
            }
        }
    }
}
