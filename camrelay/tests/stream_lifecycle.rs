//! End-to-end lifecycle tests for the stream registry.
//!
//! A small shell script stands in for ffmpeg: it writes a manifest and one
//! segment into the session directory and then idles, so the whole path from
//! descriptor to served artifact runs against real processes and files.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use camrelay::Error;
use camrelay::config::StreamConfig;
use camrelay::registry::StreamRegistry;
use camrelay::source::{CameraDescriptor, Vendor};
use camrelay::store::Readiness;
use camrelay::supervisor::{SessionState, StreamEvent};
use camrelay::transcoder::{TranscodeJob, Transcoder};
use futures::future::join_all;
use process_utils::supervised_command;
use tempfile::TempDir;
use tokio::process::Command;

const PRODUCING: &str = "printf 'x' > \"$OUT_DIR/segment_00000.ts\"; \
     printf '#EXTM3U\\n#EXTINF:2.0,\\nsegment_00000.ts\\n' > \"$OUT_DIR/index.m3u8\"; \
     exec sleep 30";

const SILENT: &str = "exec sleep 30";

const SLOW: &str = "sleep 1; printf 'x' > \"$OUT_DIR/segment_00000.ts\"; \
     printf '#EXTM3U\\n' > \"$OUT_DIR/index.m3u8\"; exec sleep 30";

const GARBLED_STDERR: &str = "printf '\\377\\376 bad bytes\\n' >&2; sleep 0.3; \
     echo 'still here' >&2; printf 'x' > \"$OUT_DIR/segment_00000.ts\"; \
     printf '#EXTM3U\\n' > \"$OUT_DIR/index.m3u8\"; exec sleep 30";

/// Runs a shell script in place of a real transcoder.
struct ScriptTranscoder {
    script: &'static str,
    spawns: AtomicUsize,
}

impl ScriptTranscoder {
    fn new(script: &'static str) -> Arc<Self> {
        Arc::new(Self {
            script,
            spawns: AtomicUsize::new(0),
        })
    }

    fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

impl Transcoder for ScriptTranscoder {
    fn name(&self) -> &str {
        "script"
    }

    fn version(&self) -> Option<String> {
        Some("test".to_string())
    }

    fn command(&self, job: &TranscodeJob) -> Command {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let mut cmd = supervised_command("sh");
        cmd.args(["-c", self.script])
            .env("OUT_DIR", &job.output_dir);
        cmd
    }
}

fn setup(temp: &TempDir, transcoder: Arc<ScriptTranscoder>) -> Arc<StreamRegistry> {
    let config = StreamConfig {
        media_dir: temp.path().join("media"),
        ready_timeout: Duration::from_secs(3),
        poll_interval: Duration::from_millis(50),
        idle_timeout: Duration::from_secs(60),
        kill_grace: Duration::from_millis(200),
        ..Default::default()
    };
    Arc::new(StreamRegistry::new(config, transcoder))
}

fn camera() -> CameraDescriptor {
    CameraDescriptor::new("10.0.0.5")
        .with_vendor(Vendor::Hikvision)
        .with_credentials("admin", "secret")
}

fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn config(temp: &TempDir, ready_timeout: Duration, idle_timeout: Duration) -> StreamConfig {
    StreamConfig {
        media_dir: temp.path().join("media"),
        ready_timeout,
        poll_interval: Duration::from_millis(50),
        idle_timeout,
        kill_grace: Duration::from_millis(200),
        ..Default::default()
    }
}

async fn wait_until_active(registry: &StreamRegistry, stream_id: &str) {
    for _ in 0..50 {
        if registry.list_active().iter().any(|id| id == stream_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{stream_id} never became active");
}

async fn wait_gone(pid: u32) {
    for _ in 0..50 {
        if !process_alive(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("process {pid} still alive");
}

mod startup {
    use super::*;

    #[tokio::test]
    async fn test_start_serve_and_stop() {
        let temp = TempDir::new().unwrap();
        let registry = setup(&temp, ScriptTranscoder::new(PRODUCING));

        let status = registry
            .get_or_start("cam1", &camera(), None)
            .await
            .expect("stream should become ready");
        assert_eq!(status.state, SessionState::Ready);
        assert_eq!(status.manifest_url, "/media/cam1/index.m3u8");
        assert_eq!(registry.list_active(), vec!["cam1".to_string()]);

        let manifest = registry.serve("cam1", "index.m3u8").await.unwrap();
        assert_eq!(manifest.content_type, "application/vnd.apple.mpegurl");
        assert!(manifest.bytes.starts_with(b"#EXTM3U"));

        let segment = registry.serve("cam1", "segment_00000.ts").await.unwrap();
        assert_eq!(segment.content_type, "video/mp2t");

        let pid = status.pid.expect("running session has a pid");
        assert!(registry.stop("cam1").await);
        assert!(!process_alive(pid));
        assert!(registry.list_active().is_empty());

        match registry.serve("cam1", "index.m3u8").await {
            Err(Error::NotFound(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_process() {
        let temp = TempDir::new().unwrap();
        let transcoder = ScriptTranscoder::new(PRODUCING);
        let registry = setup(&temp, transcoder.clone());
        let descriptor = camera();

        let results = join_all(
            (0..8).map(|_| registry.get_or_start("cam1", &descriptor, None)),
        )
        .await;

        let session_ids: Vec<String> = results
            .into_iter()
            .map(|r| r.expect("stream should become ready").session_id)
            .collect();
        assert!(session_ids.iter().all(|id| id == &session_ids[0]));
        assert_eq!(transcoder.spawns(), 1);

        // A ready stream answers immediately and is not respawned
        let again = tokio::time::timeout(
            Duration::from_millis(500),
            registry.get_or_start("cam1", &descriptor, None),
        )
        .await
        .expect("ready stream should not wait")
        .unwrap();
        assert_eq!(again.session_id, session_ids[0]);
        assert_eq!(transcoder.spawns(), 1);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_descriptor_spawns_nothing() {
        let temp = TempDir::new().unwrap();
        let transcoder = ScriptTranscoder::new(PRODUCING);
        let registry = setup(&temp, transcoder.clone());

        let result = registry
            .get_or_start("cam1", &CameraDescriptor::new("  "), None)
            .await;
        assert!(matches!(result, Err(Error::InvalidDescriptor(_))));

        let result = registry.get_or_start("../cam1", &camera(), None).await;
        assert!(matches!(result, Err(Error::InvalidDescriptor(_))));

        assert_eq!(transcoder.spawns(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_silent_source_times_out_and_is_torn_down() {
        let temp = TempDir::new().unwrap();
        let transcoder = ScriptTranscoder::new(SILENT);
        let config = StreamConfig {
            media_dir: temp.path().join("media"),
            ready_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            kill_grace: Duration::from_millis(200),
            ..Default::default()
        };
        let registry = StreamRegistry::new(config, transcoder.clone());

        let mut events = registry.subscribe();
        let result = registry.get_or_start("cam1", &camera(), None).await;
        assert!(matches!(result, Err(Error::TimedOut { .. })));
        assert!(registry.list_active().is_empty());
        assert!(registry.status("cam1").is_none());

        let pid = match events.recv().await.unwrap() {
            StreamEvent::Started { pid: Some(pid), .. } => pid,
            other => panic!("unexpected event: {other:?}"),
        };
        assert!(!process_alive(pid));

        // The session directory is gone once the process has been reaped
        let stream_dir = registry.store().stream_dir("cam1");
        for _ in 0..50 {
            if !stream_dir.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!stream_dir.exists());

        // A later request starts over with a fresh process
        let _ = registry.get_or_start("cam1", &camera(), None).await;
        assert_eq!(transcoder.spawns(), 2);
    }

    #[tokio::test]
    async fn test_deadline_holds_after_caller_goes_away() {
        let temp = TempDir::new().unwrap();
        let registry = StreamRegistry::new(
            config(&temp, Duration::from_millis(300), Duration::from_secs(60)),
            ScriptTranscoder::new(SILENT),
        );

        // The caller gives up long before the start-up deadline
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            registry.get_or_start("cam1", &camera(), None),
        )
        .await;
        assert!(abandoned.is_err());
        let pid = registry.status("cam1").and_then(|s| s.pid).unwrap();

        let mut state = SessionState::Starting;
        for _ in 0..60 {
            state = registry.status("cam1").unwrap().state;
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(state, SessionState::Failed);
        assert!(registry.list_active().is_empty());
        wait_gone(pid).await;
    }

    #[tokio::test]
    async fn test_await_ready_for_active_stream() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(StreamRegistry::new(
            config(&temp, Duration::from_secs(5), Duration::from_secs(60)),
            ScriptTranscoder::new(SLOW),
        ));

        match registry.await_ready("cam1", Duration::from_secs(1)).await {
            Err(Error::NotFound(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }

        let starter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_start("cam1", &camera(), None).await })
        };
        wait_until_active(&registry, "cam1").await;

        let readiness = registry
            .await_ready("cam1", Duration::from_secs(4))
            .await
            .unwrap();
        assert_eq!(readiness, Readiness::Ready);
        assert_eq!(registry.status("cam1").unwrap().state, SessionState::Ready);
        assert!(starter.await.unwrap().is_ok());

        // Level-triggered once ready
        let readiness = registry.await_ready("cam1", Duration::ZERO).await.unwrap();
        assert_eq!(readiness, Readiness::Ready);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_await_ready_timeout_fails_stream() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(StreamRegistry::new(
            config(&temp, Duration::from_secs(5), Duration::from_secs(60)),
            ScriptTranscoder::new(SILENT),
        ));

        let starter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_start("cam1", &camera(), None).await })
        };
        wait_until_active(&registry, "cam1").await;
        let pid = registry.status("cam1").and_then(|s| s.pid).unwrap();

        let readiness = registry
            .await_ready("cam1", Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(readiness, Readiness::TimedOut);
        assert!(!process_alive(pid));
        assert!(registry.list_active().is_empty());

        let result = starter.await.unwrap();
        assert!(matches!(result, Err(Error::TimedOut { .. })));
    }

    #[tokio::test]
    async fn test_garbled_stderr_does_not_kill_stream() {
        let temp = TempDir::new().unwrap();
        let registry = setup(&temp, ScriptTranscoder::new(GARBLED_STDERR));

        let status = registry
            .get_or_start("cam1", &camera(), None)
            .await
            .expect("stream should survive non UTF-8 output");
        assert_eq!(status.state, SessionState::Ready);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let pid = status.pid.unwrap();
        assert!(process_alive(pid));
        assert_eq!(registry.status("cam1").unwrap().state, SessionState::Ready);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_during_startup_fails_waiters() {
        let temp = TempDir::new().unwrap();
        let registry = setup(&temp, ScriptTranscoder::new(SILENT));

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_start("cam1", &camera(), None).await })
        };

        for _ in 0..50 {
            if !registry.list_active().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let pid = registry.status("cam1").and_then(|s| s.pid).unwrap();

        assert!(registry.stop("cam1").await);
        assert!(!registry.stop("cam1").await);

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Stopped { .. })));
        wait_gone(pid).await;
    }
}

mod delivery {
    use super::*;

    #[tokio::test]
    async fn test_traversal_is_rejected_before_lookup() {
        let temp = TempDir::new().unwrap();
        let registry = setup(&temp, ScriptTranscoder::new(PRODUCING));
        registry.get_or_start("cam1", &camera(), None).await.unwrap();

        for path in ["../../etc/passwd", "/etc/passwd", "a/../../b", ""] {
            match registry.serve("cam1", path).await {
                Err(Error::InvalidPath(_)) => {}
                other => panic!("{path:?}: unexpected {other:?}"),
            }
        }

        // Unknown streams with bad paths still report the path
        assert!(matches!(
            registry.serve("nope", "../x").await,
            Err(Error::InvalidPath(_))
        ));

        match registry.serve("cam1", "segment_99999.ts").await {
            Err(Error::NotFound(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }

        registry.shutdown().await;
    }
}

mod reclamation {
    use super::*;

    #[tokio::test]
    async fn test_idle_stream_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let config = StreamConfig {
            media_dir: temp.path().join("media"),
            ready_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(200),
            kill_grace: Duration::from_millis(200),
            ..Default::default()
        };
        let registry = StreamRegistry::new(config, ScriptTranscoder::new(PRODUCING));

        let status = registry.get_or_start("cam1", &camera(), None).await.unwrap();
        let pid = status.pid.unwrap();
        let mut events = registry.subscribe();

        // Fresh activity keeps it alive
        assert_eq!(registry.sweep_once().await, 0);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(registry.sweep_once().await, 1);
        assert!(registry.list_active().is_empty());
        assert!(!process_alive(pid));

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert!(kinds.contains(&"reclaimed"));
    }

    #[tokio::test]
    async fn test_pending_waiter_keeps_stream_alive() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(StreamRegistry::new(
            config(&temp, Duration::from_secs(3), Duration::from_millis(200)),
            ScriptTranscoder::new(SLOW),
        ));

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_start("cam1", &camera(), None).await })
        };
        wait_until_active(&registry, "cam1").await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.sweep_once().await, 0);

        let status = waiter.await.unwrap().expect("waiter should see the stream ready");
        assert_eq!(status.state, SessionState::Ready);

        registry.shutdown().await;
    }
}
