//! Transcoder process supervision.
//!
//! Every session gets one monitor task that owns the child process. The task
//! watches the session's termination token, the process exit, the process
//! stderr and the start-up deadline. Everything else talks to the process
//! through the session.

mod events;
mod output;
mod session;
mod state;

pub use events::{EVENT_CHANNEL_CAPACITY, StreamEvent};
pub use session::StreamSession;
pub use state::{Failure, SessionEvent, SessionMachine, SessionState, Transition};

use std::sync::Arc;
use std::time::Duration;

use process_utils::shutdown_child;
use tokio::process::{Child, ChildStderr};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::source::redact_url;
use crate::store::ArtifactStore;
use crate::transcoder::{DiagnosticKind, TranscodeJob, Transcoder};
use crate::{Error, Result};
use output::StderrRecords;

/// How long stderr is drained after the process exits on its own.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

type Stderr = StderrRecords<ChildStderr>;

/// Spawns transcoder processes and drives their sessions.
pub struct ProcessSupervisor {
    transcoder: Arc<dyn Transcoder>,
    store: ArtifactStore,
    ready_timeout: Duration,
    kill_grace: Duration,
    events: broadcast::Sender<StreamEvent>,
}

impl ProcessSupervisor {
    /// `ready_timeout` bounds how long a session may stay `Starting`, whether
    /// or not anyone is waiting for it.
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        store: ArtifactStore,
        ready_timeout: Duration,
        kill_grace: Duration,
        events: broadcast::Sender<StreamEvent>,
    ) -> Self {
        Self {
            transcoder,
            store,
            ready_timeout,
            kill_grace,
            events,
        }
    }

    pub fn transcoder(&self) -> &Arc<dyn Transcoder> {
        &self.transcoder
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Spawn a transcoder for `stream_id` and start monitoring it.
    ///
    /// The session, and with it the termination token, exists before the
    /// process does; the child is also killed if its handle is ever dropped.
    pub fn spawn(&self, stream_id: &str, pull_url: &str, audio: bool) -> Result<Arc<StreamSession>> {
        if !self.transcoder.is_available() {
            return Err(Error::ToolUnavailable(format!(
                "{} binary not found or not executable",
                self.transcoder.name()
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        let artifact_dir = self.store.create_session_dir(stream_id, &session_id)?;
        let session = Arc::new(StreamSession::new(
            stream_id,
            session_id,
            pull_url,
            artifact_dir.clone(),
            audio,
            self.events.clone(),
        ));

        let job = TranscodeJob {
            stream_id: stream_id.to_string(),
            pull_url: pull_url.to_string(),
            output_dir: artifact_dir.clone(),
            audio,
        };

        let mut child = match self.transcoder.command(&job).spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&artifact_dir);
                if let Some(parent) = artifact_dir.parent() {
                    let _ = std::fs::remove_dir(parent);
                }
                return Err(match e.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                        Error::ToolUnavailable(format!(
                            "failed to spawn {}: {}",
                            self.transcoder.name(),
                            e
                        ))
                    }
                    _ => Error::io_path("spawning transcoder for", &artifact_dir, e),
                });
            }
        };

        if let Some(pid) = child.id() {
            session.set_pid(pid);
        }
        let stderr = child.stderr.take();

        info!(
            stream_id = %stream_id,
            session_id = %session.session_id(),
            pid = ?session.pid(),
            source = %redact_url(pull_url),
            audio,
            "Spawned {}",
            self.transcoder.name()
        );

        let _ = self.events.send(StreamEvent::Started {
            stream_id: stream_id.to_string(),
            session_id: session.session_id().to_string(),
            pid: session.pid(),
        });

        tokio::spawn(monitor(
            session.clone(),
            child,
            stderr.map(StderrRecords::new),
            self.transcoder.clone(),
            self.store.clone(),
            self.ready_timeout,
            self.kill_grace,
        ));

        Ok(session)
    }

    /// Stop a session and wait until its process is reaped.
    ///
    /// Effective in any state; a no-op for sessions that already finished.
    pub async fn stop(&self, session: &StreamSession) {
        session.apply(SessionEvent::StopRequested);
        session.request_termination();
        session.wait_exited().await;
    }

    /// Fail a session that missed its start-up deadline.
    ///
    /// Returns `false` if the session left `Starting` in the meantime, in
    /// which case it is left alone.
    pub async fn abort_startup(&self, session: &StreamSession, timeout: Duration) -> bool {
        if session
            .apply(SessionEvent::DeadlineElapsed { timeout })
            .is_none()
        {
            return false;
        }

        session.request_termination();
        session.wait_exited().await;
        true
    }
}

/// Owns the child process for the lifetime of the session.
async fn monitor(
    session: Arc<StreamSession>,
    mut child: Child,
    mut stderr: Option<Stderr>,
    transcoder: Arc<dyn Transcoder>,
    store: ArtifactStore,
    ready_timeout: Duration,
    kill_grace: Duration,
) {
    let terminate = session.termination_token();
    let startup_deadline = tokio::time::sleep(ready_timeout.saturating_sub(session.age()));
    tokio::pin!(startup_deadline);
    let mut deadline_armed = true;

    loop {
        tokio::select! {
            _ = terminate.cancelled() => {
                match shutdown_child(&mut child, transcoder.quit_sequence(), kill_grace).await {
                    Ok(status) => debug!(
                        stream_id = %session.stream_id(),
                        session_id = %session.session_id(),
                        "Transcoder terminated: {}",
                        status
                    ),
                    Err(e) => warn!(
                        stream_id = %session.stream_id(),
                        session_id = %session.session_id(),
                        "Failed to terminate transcoder: {}",
                        e
                    ),
                }
                break;
            }
            status = child.wait() => {
                // The last lines usually carry the reason
                if let Some(records) = stderr.as_mut() {
                    while let Ok(Ok(Some(line))) =
                        tokio::time::timeout(STDERR_DRAIN_TIMEOUT, records.next_record()).await
                    {
                        handle_line(&session, transcoder.as_ref(), &line);
                    }
                }

                let code = match status {
                    Ok(status) => {
                        debug!(
                            stream_id = %session.stream_id(),
                            session_id = %session.session_id(),
                            "Transcoder exited: {}",
                            status
                        );
                        status.code()
                    }
                    Err(e) => {
                        warn!(stream_id = %session.stream_id(), "Error waiting for transcoder: {}", e);
                        None
                    }
                };
                session.apply(SessionEvent::Exited { code });
                break;
            }
            _ = &mut startup_deadline, if deadline_armed => {
                deadline_armed = false;
                enforce_startup_deadline(&session, ready_timeout).await;
            }
            record = next_record(&mut stderr) => match record {
                Ok(Some(line)) => {
                    handle_line(&session, transcoder.as_ref(), &line);
                    if session.state().is_terminal() {
                        session.request_termination();
                    }
                }
                // The child closed its end
                Ok(None) => stderr = None,
                Err(e) => {
                    debug!(
                        stream_id = %session.stream_id(),
                        "Failed to read transcoder stderr, discarding further output: {}",
                        e
                    );
                    // Closing the pipe would kill the child with SIGPIPE
                    if let Some(records) = stderr.take() {
                        let mut reader = records.into_inner();
                        tokio::spawn(async move {
                            let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                        });
                    }
                }
            },
        }
    }

    if let Err(e) = store.remove_session_dir(session.artifact_dir()).await {
        warn!(
            stream_id = %session.stream_id(),
            session_id = %session.session_id(),
            "Failed to remove artifacts: {}",
            e
        );
    }

    info!(
        stream_id = %session.stream_id(),
        session_id = %session.session_id(),
        state = %session.state(),
        "Session finished"
    );
    session.mark_exited();
}

/// Next stderr record, or pending forever once stderr is gone.
async fn next_record(stderr: &mut Option<Stderr>) -> std::io::Result<Option<String>> {
    match stderr {
        Some(records) => records.next_record().await,
        None => std::future::pending().await,
    }
}

/// Fail a session still `Starting` when its start-up deadline passes.
///
/// Waiters probe the artifact directory themselves, but there may be none
/// left, so the directory is checked once more before giving up.
async fn enforce_startup_deadline(session: &StreamSession, timeout: Duration) {
    if session.state() != SessionState::Starting {
        return;
    }

    if let Ok(probe) = ArtifactStore::probe(session.artifact_dir()).await
        && probe.is_playable()
    {
        session.apply(SessionEvent::FirstSegment);
        return;
    }

    if session
        .apply(SessionEvent::DeadlineElapsed { timeout })
        .is_some()
    {
        warn!(
            stream_id = %session.stream_id(),
            session_id = %session.session_id(),
            "No playable segment within {:?}, terminating transcoder",
            timeout
        );
        session.request_termination();
    }
}

fn handle_line(session: &StreamSession, transcoder: &dyn Transcoder, line: &str) {
    let Some(diagnostic) = transcoder.classify(line) else {
        trace!(stream_id = %session.stream_id(), "{}", line);
        return;
    };

    match diagnostic.kind {
        DiagnosticKind::Connect => info!(
            stream_id = %session.stream_id(),
            "Source connection problem: {}",
            diagnostic.message
        ),
        DiagnosticKind::Fatal => warn!(
            stream_id = %session.stream_id(),
            "Transcoder fatal error: {}",
            diagnostic.message
        ),
        DiagnosticKind::Warning => debug!(
            stream_id = %session.stream_id(),
            "Transcoder: {}",
            diagnostic.message
        ),
    }

    session.apply(SessionEvent::Diagnostic(diagnostic));
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use process_utils::supervised_command;
    use tempfile::TempDir;
    use tokio::process::Command;

    struct ShellTranscoder {
        script: &'static str,
        program: &'static str,
        available: bool,
    }

    impl ShellTranscoder {
        fn new(script: &'static str) -> Self {
            Self {
                script,
                program: "sh",
                available: true,
            }
        }
    }

    impl Transcoder for ShellTranscoder {
        fn name(&self) -> &str {
            "shell"
        }

        fn version(&self) -> Option<String> {
            self.available.then(|| "test".to_string())
        }

        fn command(&self, job: &TranscodeJob) -> Command {
            let mut cmd = supervised_command(self.program);
            cmd.args(["-c", self.script]).env("OUT_DIR", &job.output_dir);
            cmd
        }
    }

    fn supervisor(temp: &TempDir, transcoder: ShellTranscoder) -> ProcessSupervisor {
        supervisor_with_deadline(temp, transcoder, Duration::from_secs(30))
    }

    fn supervisor_with_deadline(
        temp: &TempDir,
        transcoder: ShellTranscoder,
        ready_timeout: Duration,
    ) -> ProcessSupervisor {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        ProcessSupervisor::new(
            Arc::new(transcoder),
            ArtifactStore::new(temp.path()),
            ready_timeout,
            Duration::from_millis(200),
            events,
        )
    }

    fn process_alive(pid: u32) -> bool {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }

    #[tokio::test]
    async fn test_stop_terminates_process_and_removes_artifacts() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, ShellTranscoder::new("exec sleep 30"));

        let session = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap();
        let pid = session.pid().unwrap();
        assert!(session.artifact_dir().exists());
        assert_eq!(session.state(), SessionState::Starting);

        supervisor.stop(&session).await;

        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.has_exited());
        assert!(!session.artifact_dir().exists());
        assert!(!process_alive(pid));

        // Stopping again is harmless
        supervisor.stop(&session).await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_early_exit_reports_connect_failure() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(
            &temp,
            ShellTranscoder::new("echo 'rtsp://10.0.0.5: Connection refused' >&2; exit 1"),
        );

        let session = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap();
        tokio::time::timeout(Duration::from_secs(5), session.wait_exited())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Failed);
        match session.terminal_error() {
            Some(Error::ConnectFailed { reason, .. }) => {
                assert!(reason.contains("Connection refused"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_diagnostic_terminates_process() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(
            &temp,
            ShellTranscoder::new(
                "echo 'Invalid data found when processing input' >&2; exec sleep 30",
            ),
        );

        let session = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap();
        let pid = session.pid().unwrap();
        tokio::time::timeout(Duration::from_secs(5), session.wait_exited())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Failed);
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn test_abort_startup_fails_session() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, ShellTranscoder::new("exec sleep 30"));

        let session = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap();
        let pid = session.pid().unwrap();

        assert!(
            supervisor
                .abort_startup(&session, Duration::from_secs(1))
                .await
        );
        assert!(matches!(
            session.terminal_error(),
            Some(Error::TimedOut { .. })
        ));
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn test_startup_deadline_fails_unwatched_session() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor_with_deadline(
            &temp,
            ShellTranscoder::new("exec sleep 30"),
            Duration::from_millis(300),
        );

        // Nobody waits on the session
        let session = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap();
        let pid = session.pid().unwrap();
        tokio::time::timeout(Duration::from_secs(5), session.wait_exited())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(
            session.terminal_error(),
            Some(Error::TimedOut { .. })
        ));
        assert!(!process_alive(pid));
        assert!(!session.artifact_dir().exists());
    }

    #[tokio::test]
    async fn test_startup_deadline_accepts_unwatched_playable_session() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor_with_deadline(
            &temp,
            ShellTranscoder::new(
                "printf 'x' > \"$OUT_DIR/segment_00000.ts\"; \
                 printf '#EXTM3U\\n' > \"$OUT_DIR/index.m3u8\"; exec sleep 30",
            ),
            Duration::from_millis(300),
        );

        let session = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap();
        let pid = session.pid().unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(session.state(), SessionState::Ready);
        assert!(process_alive(pid));

        supervisor.stop(&session).await;
    }

    #[tokio::test]
    async fn test_invalid_utf8_on_stderr_keeps_process_alive() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(
            &temp,
            ShellTranscoder::new(
                "printf '\\377\\376 bad bytes\\n' >&2; sleep 0.2; \
                 echo 'still here' >&2; exec sleep 30",
            ),
        );

        let session = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap();
        let pid = session.pid().unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(session.state(), SessionState::Starting);
        assert!(!session.has_exited());
        assert!(process_alive(pid));

        supervisor.stop(&session).await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_abort_startup_leaves_ready_session_alone() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, ShellTranscoder::new("exec sleep 30"));

        let session = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap();
        session.apply(SessionEvent::FirstSegment);

        assert!(
            !supervisor
                .abort_startup(&session, Duration::from_secs(1))
                .await
        );
        assert_eq!(session.state(), SessionState::Ready);

        supervisor.stop(&session).await;
    }

    #[tokio::test]
    async fn test_unavailable_transcoder_spawns_nothing() {
        let temp = TempDir::new().unwrap();
        let mut transcoder = ShellTranscoder::new("exit 0");
        transcoder.available = false;
        let supervisor = supervisor(&temp, transcoder);

        let err = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap_err();
        assert!(matches!(err, Error::ToolUnavailable(_)));
        assert!(!temp.path().join("cam1").exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_unavailable() {
        let temp = TempDir::new().unwrap();
        let mut transcoder = ShellTranscoder::new("exit 0");
        transcoder.program = "/nonexistent/transcoder";
        let supervisor = supervisor(&temp, transcoder);

        let err = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap_err();
        assert!(matches!(err, Error::ToolUnavailable(_)));
        assert!(!temp.path().join("cam1").exists());
    }

    #[tokio::test]
    async fn test_started_event_is_broadcast() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, ShellTranscoder::new("exec sleep 30"));
        let mut events = supervisor.events.subscribe();

        let session = supervisor.spawn("cam1", "rtsp://10.0.0.5/stream", false).unwrap();
        match events.recv().await.unwrap() {
            StreamEvent::Started { stream_id, pid, .. } => {
                assert_eq!(stream_id, "cam1");
                assert_eq!(pid, session.pid());
            }
            other => panic!("unexpected event: {other:?}"),
        }

        supervisor.stop(&session).await;
        assert!(matches!(
            events.recv().await.unwrap(),
            StreamEvent::Stopped { .. }
        ));
    }
}
