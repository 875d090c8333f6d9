//! Child-process helpers shared by the inference adapters and the backend
//! supervisor.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Output of a bounded one-shot subprocess run.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run a command to completion with piped stdio and a hard deadline.
///
/// `stdin_data`, when present, is written to the child's stdin which is then
/// closed. Stdout and stderr are drained concurrently so the child can never
/// stall on a full pipe. If the deadline expires the child is killed and
/// `ErrorKind::TimedOut` is returned.
pub async fn run_captured(
    mut cmd: Command,
    stdin_data: Option<Vec<u8>>,
    deadline: Duration,
) -> io::Result<CapturedOutput> {
    cmd.stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    if stdin_data.is_some() {
        cmd.stdin(std::process::Stdio::piped());
    } else {
        cmd.stdin(std::process::Stdio::null());
    }

    let mut child = cmd.spawn()?;

    if let Some(data) = stdin_data {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin not captured"))?;
        tokio::spawn(async move {
            let _ = stdin.write_all(&data).await;
            let _ = stdin.shutdown().await;
            // stdin drops here, closing the pipe
        });
    }

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout not captured"))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr not captured"))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let status = match timeout(deadline, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("subprocess exceeded {deadline:?}"),
            ));
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
    })
}

/// Gracefully shut down a long-lived child: SIGTERM, then SIGKILL after a
/// grace period. On non-Unix platforms the child is killed immediately.
pub async fn shutdown_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    if let Ok(status) = timeout(grace, child.wait()).await {
                        return status;
                    }
                    // Grace period expired, escalate.
                }
                Err(nix::errno::Errno::ESRCH) => {
                    // Already gone, just reap it.
                    return child.wait().await;
                }
                Err(e) => return Err(io::Error::other(e)),
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    child.kill().await?;
    child.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captured_collects_stdout() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = run_captured(cmd, None, Duration::from_secs(5))
            .await
            .expect("echo should run");
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn run_captured_feeds_stdin() {
        let cmd = Command::new("cat");
        let out = run_captured(cmd, Some(b"piped".to_vec()), Duration::from_secs(5))
            .await
            .expect("cat should run");
        assert_eq!(out.stdout, b"piped");
    }

    #[tokio::test]
    async fn run_captured_kills_on_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let err = run_captured(cmd, None, Duration::from_millis(100))
            .await
            .expect_err("sleep should be killed");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn shutdown_child_terminates_sleeper() {
        let mut child = Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("failed to spawn sleep");
        let result = shutdown_child(&mut child, Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }
}
