//! Stream registry.
//!
//! Maps stream ids to their live session. The session table is the only
//! shared mutable structure; creation happens under the table's per-key entry
//! lock, so concurrent first requests for a stream spawn exactly one process.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::delivery::{self, Artifact};
use crate::source::{self, CameraDescriptor};
use crate::store::{self, ArtifactStore, Readiness};
use crate::supervisor::{
    EVENT_CHANNEL_CAPACITY, ProcessSupervisor, SessionState, StreamEvent, StreamSession,
};
use crate::transcoder::{MANIFEST_NAME, Transcoder};
use crate::{Error, Result};

/// Snapshot of a stream session.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream_id: String,
    pub session_id: String,
    pub state: SessionState,
    pub manifest_url: String,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
    /// Whether audio is transcoded.
    pub audio: bool,
    pub idle_secs: u64,
    pub last_error: Option<String>,
}

/// Registry of active stream sessions.
pub struct StreamRegistry {
    sessions: DashMap<String, Arc<StreamSession>>,
    supervisor: ProcessSupervisor,
    config: StreamConfig,
    events: broadcast::Sender<StreamEvent>,
}

impl StreamRegistry {
    pub fn new(config: StreamConfig, transcoder: Arc<dyn Transcoder>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let supervisor = ProcessSupervisor::new(
            transcoder,
            ArtifactStore::new(config.media_dir.clone()),
            config.ready_timeout,
            config.kill_grace,
            events.clone(),
        );

        Self {
            sessions: DashMap::new(),
            supervisor,
            config,
            events,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        self.supervisor.store()
    }

    pub fn transcoder(&self) -> &Arc<dyn Transcoder> {
        self.supervisor.transcoder()
    }

    /// Subscribe to lifecycle events of all sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Start a stream, or join the session already running for it, and wait
    /// until it is playable.
    ///
    /// The descriptor is resolved before anything is spawned. A session that
    /// misses the start-up deadline is terminated and reported as failed.
    pub async fn get_or_start(
        &self,
        stream_id: &str,
        descriptor: &CameraDescriptor,
        audio: Option<bool>,
    ) -> Result<StreamStatus> {
        ArtifactStore::validate_stream_id(stream_id)?;
        let pull_url = source::resolve(descriptor)?;
        let audio = audio.unwrap_or(self.config.audio_default);

        let session = self.start_or_reuse(stream_id, &pull_url, audio)?;

        // The deadline counts from session creation, not from when this
        // caller joined.
        let remaining = self.config.ready_timeout.saturating_sub(session.age());
        match self
            .wait_for(&session, remaining, self.config.ready_timeout)
            .await?
        {
            Readiness::Ready => Ok(self.snapshot(&session)),
            Readiness::TimedOut => Err(session.terminal_error().unwrap_or_else(|| {
                Error::TimedOut {
                    stream_id: stream_id.to_string(),
                    timeout: self.config.ready_timeout,
                }
            })),
        }
    }

    fn start_or_reuse(
        &self,
        stream_id: &str,
        pull_url: &str,
        audio: bool,
    ) -> Result<Arc<StreamSession>> {
        match self.sessions.entry(stream_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().state().is_terminal() {
                    debug!(
                        stream_id = %stream_id,
                        session_id = %occupied.get().session_id(),
                        "Joining existing session"
                    );
                    return Ok(occupied.get().clone());
                }

                // Terminal sessions are never resurrected
                match self.supervisor.spawn(stream_id, pull_url, audio) {
                    Ok(session) => {
                        let previous = occupied.insert(session.clone());
                        previous.request_termination();
                        Ok(session)
                    }
                    Err(e) => {
                        occupied.remove();
                        Err(e)
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let session = self.supervisor.spawn(stream_id, pull_url, audio)?;
                vacant.insert(session.clone());
                Ok(session)
            }
        }
    }

    /// Wait for an active stream to become playable.
    ///
    /// On `TimedOut` the session has been failed and its process terminated.
    pub async fn await_ready(&self, stream_id: &str, timeout: Duration) -> Result<Readiness> {
        let session = self
            .live_session(stream_id)
            .ok_or_else(|| Error::not_found(format!("stream {stream_id} is not active")))?;
        self.wait_for(&session, timeout, timeout).await
    }

    async fn wait_for(
        &self,
        session: &Arc<StreamSession>,
        wait: Duration,
        timeout: Duration,
    ) -> Result<Readiness> {
        match store::await_ready(session, wait, self.config.poll_interval).await {
            Ok(Readiness::Ready) => Ok(Readiness::Ready),
            Ok(Readiness::TimedOut) => {
                let aborted = self.supervisor.abort_startup(session, timeout).await;
                if !aborted && session.state() == SessionState::Ready {
                    return Ok(Readiness::Ready);
                }
                self.evict(session);
                Ok(Readiness::TimedOut)
            }
            Err(e) => {
                self.evict(session);
                Err(e)
            }
        }
    }

    /// Stop a stream. Returns whether there was anything to stop.
    pub async fn stop(&self, stream_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(stream_id) else {
            debug!(stream_id = %stream_id, "Stop requested for unknown stream");
            return false;
        };

        self.supervisor.stop(&session).await;
        true
    }

    /// Ids of streams with a `Starting` or `Ready` session, sorted.
    pub fn list_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().state().is_terminal())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshots of all known sessions, sorted by stream id.
    pub fn list_status(&self) -> Vec<StreamStatus> {
        let mut statuses: Vec<StreamStatus> = self
            .sessions
            .iter()
            .map(|entry| self.snapshot(entry.value()))
            .collect();
        statuses.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        statuses
    }

    /// Snapshot of a stream's session, without starting anything.
    pub fn status(&self, stream_id: &str) -> Option<StreamStatus> {
        self.sessions
            .get(stream_id)
            .map(|entry| self.snapshot(entry.value()))
    }

    /// Number of sessions in the table, terminal ones included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Serve a manifest or segment of an active stream.
    ///
    /// The path is validated before the session is even looked up.
    pub async fn serve(&self, stream_id: &str, artifact: &str) -> Result<Artifact> {
        let relative = delivery::validate_artifact_path(artifact)?;
        let session = self
            .live_session(stream_id)
            .ok_or_else(|| Error::not_found(format!("stream {stream_id} is not active")))?;

        session.touch();
        delivery::read_artifact(session.artifact_dir(), &relative).await
    }

    /// Prune terminal sessions and reclaim idle ones. Returns how many
    /// sessions were reclaimed.
    pub async fn sweep_once(&self) -> usize {
        self.sessions
            .retain(|_, session| !session.state().is_terminal());

        let idle: Vec<Arc<StreamSession>> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() >= self.config.idle_timeout)
            .map(|entry| entry.value().clone())
            .collect();

        let mut reclaimed = 0;
        for session in idle {
            // A concurrent stop or restart got there first
            if !self.evict(&session) {
                continue;
            }

            let idle_secs = session.idle_for().as_secs();
            info!(
                stream_id = %session.stream_id(),
                session_id = %session.session_id(),
                idle_secs,
                "Reclaiming idle stream"
            );
            self.supervisor.stop(&session).await;

            let _ = self.events.send(StreamEvent::Reclaimed {
                stream_id: session.stream_id().to_string(),
                session_id: session.session_id().to_string(),
                idle_secs,
            });
            reclaimed += 1;
        }

        reclaimed
    }

    /// Run [`Self::sweep_once`] every sweep interval until cancelled.
    pub fn start_idle_sweep(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Idle sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reclaimed = registry.sweep_once().await;
                        if reclaimed > 0 {
                            debug!(reclaimed, active = registry.len(), "Idle sweep finished");
                        }
                    }
                }
            }
        })
    }

    /// Stop every session.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let stopped = join_all(ids.iter().map(|id| self.stop(id)))
            .await
            .into_iter()
            .filter(|stopped| *stopped)
            .count();

        if stopped > 0 {
            info!("Stopped {} streams", stopped);
        }
        if !self.sessions.is_empty() {
            warn!(
                remaining = self.sessions.len(),
                "Sessions were created during shutdown"
            );
        }
    }

    /// Manifest URL of a stream.
    pub fn manifest_url(&self, stream_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.media_url_prefix, stream_id, MANIFEST_NAME
        )
    }

    fn live_session(&self, stream_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions
            .get(stream_id)
            .map(|entry| entry.value().clone())
            .filter(|session| !session.state().is_terminal())
    }

    /// Remove `session` from the table if it is still the current one.
    fn evict(&self, session: &Arc<StreamSession>) -> bool {
        self.sessions
            .remove_if(session.stream_id(), |_, current| {
                Arc::ptr_eq(current, session)
            })
            .is_some()
    }

    fn snapshot(&self, session: &StreamSession) -> StreamStatus {
        StreamStatus {
            stream_id: session.stream_id().to_string(),
            session_id: session.session_id().to_string(),
            state: session.state(),
            manifest_url: self.manifest_url(session.stream_id()),
            started_at: session.started_at(),
            pid: session.pid(),
            audio: session.audio(),
            idle_secs: session.idle_for().as_secs(),
            last_error: session.last_error(),
        }
    }
}
