//! Child-process helpers shared across the workspace.
//!
//! Long-running children (transcoders) are spawned through these helpers so the
//! child is always tied to the handle that owns it and can be torn down with a
//! bounded wait.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
mod supervised {
    use std::ffi::OsStr;
    use std::process::{ExitStatus, Stdio};
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::process::{Child, Command};

    use super::NoWindowExt;

    impl NoWindowExt for Command {
        fn no_window(&mut self) {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
            }
        }
    }

    /// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
    pub fn tokio_command(program: impl AsRef<OsStr>) -> Command {
        let mut cmd = Command::new(program);
        cmd.no_window();
        cmd
    }

    /// Create a command for a long-lived supervised child.
    ///
    /// stdin is piped so the child can be asked to quit, stderr is piped for
    /// monitoring and stdout is discarded. The child is killed if its [`Child`]
    /// handle is dropped without being reaped.
    pub fn supervised_command(program: impl AsRef<OsStr>) -> Command {
        let mut cmd = tokio_command(program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Stop a child process and reap it.
    ///
    /// If `quit` is given it is written to the child's stdin first (ffmpeg
    /// treats `q` as a request to finish cleanly). The child then has `grace`
    /// to exit on its own before it is killed.
    pub async fn shutdown_child(
        child: &mut Child,
        quit: Option<&[u8]>,
        grace: Duration,
    ) -> std::io::Result<ExitStatus> {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(quit) = quit {
                // The child may have closed its end already.
                let _ = stdin.write_all(quit).await;
                let _ = stdin.flush().await;
            }
            drop(stdin);
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                child.kill().await?;
                child.wait().await
            }
        }
    }
}

#[cfg(feature = "tokio")]
pub use supervised::{shutdown_child, supervised_command, tokio_command};

#[cfg(all(test, unix, feature = "tokio"))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn quit_request_lets_child_exit_cleanly() {
        let mut child = supervised_command("sh")
            .args(["-c", "read line; exit 0"])
            .spawn()
            .unwrap();

        let status = shutdown_child(&mut child, Some(b"q\n"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn unresponsive_child_is_killed_after_grace() {
        let mut child = supervised_command("sh")
            .args(["-c", "exec sleep 30"])
            .spawn()
            .unwrap();

        let started = Instant::now();
        let status = shutdown_child(&mut child, None, Duration::from_millis(100))
            .await
            .unwrap();

        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn already_exited_child_returns_its_status() {
        let mut child = supervised_command("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        child.wait().await.unwrap();

        let status = shutdown_child(&mut child, Some(b"q"), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
