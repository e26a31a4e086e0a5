//! Lifecycle ownership of long-running external processes.
//!
//! A [`SupervisedProcess`] is the only handle to one child process. The
//! caller reads the child's standard output chunk by chunk; standard error is
//! drained by a background task so the child can never stall on a full pipe.
//!
//! Termination is guaranteed. [`SupervisedProcess::release`] escalates from
//! SIGTERM to SIGKILL to a raw `killpg` on the child's process group, and
//! dropping an unreleased handle runs the same escalation on the runtime.
//! The whole sequence completes in well under three seconds.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// How long a child gets to exit after SIGTERM.
pub const TERM_GRACE: Duration = Duration::from_millis(1000);

/// How long a child gets to exit after SIGKILL before the process group is
/// killed directly.
pub const KILL_GRACE: Duration = Duration::from_millis(1000);

/// Default bound on a single stdout read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// An external process owned for the duration of one stream.
///
/// Must be created from within a tokio runtime.
#[derive(Debug)]
pub struct SupervisedProcess {
    tool: String,
    pid: Option<u32>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    read_timeout: Duration,
}

impl SupervisedProcess {
    /// Spawn `program` with a fixed argument vector.
    ///
    /// Standard input is closed, standard output is piped to the caller and
    /// standard error is drained in the background. On Unix the child leads
    /// its own process group so the final kill step reaches anything it
    /// forked.
    pub fn spawn(program: &Path, args: &[String], read_timeout: Duration) -> Result<Self> {
        let tool = program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| program.to_string_lossy().to_string());

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| Error::spawn(tool.clone(), e))?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(tool.clone(), pid, stderr)));

        tracing::debug!(tool = %tool, pid = ?pid, "Spawned supervised process");

        Ok(Self {
            tool,
            pid,
            child: Some(child),
            stdout,
            stderr_task,
            read_timeout,
        })
    }

    /// OS process id, if the child was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Name of the supervised tool.
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Whether [`release`](Self::release) already ran.
    pub fn is_released(&self) -> bool {
        self.child.is_none()
    }

    /// Read the next chunk of standard output into `buf`.
    ///
    /// Returns `Ok(0)` at end of output. A read that produces nothing within
    /// the read timeout fails with [`Error::ReadTimeout`]; the caller is
    /// expected to abandon the stream and release the process.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| Error::InvalidInput("process output already closed".to_string()))?;

        match tokio::time::timeout(self.read_timeout, stdout.read(buf)).await {
            Ok(read) => Ok(read?),
            Err(_elapsed) => Err(Error::ReadTimeout {
                tool: self.tool.clone(),
                timeout: self.read_timeout,
            }),
        }
    }

    /// Reap the process once its output has ended.
    ///
    /// Fails with [`Error::ToolFailed`] when the process exited unsuccessfully
    /// (including death by signal). A process that keeps running after
    /// closing its output is released and reported as failed.
    pub async fn finish(&mut self) -> Result<()> {
        self.stdout.take();
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let waited = tokio::time::timeout(TERM_GRACE, child.wait()).await;
        let result = match waited {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(Error::tool_failed(
                self.tool.clone(),
                format!("exited with {status}"),
            )),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_elapsed) => {
                terminate(&mut child, self.pid, &self.tool).await;
                Err(Error::tool_failed(
                    self.tool.clone(),
                    "output closed but the process kept running",
                ))
            }
        };

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        result
    }

    /// Terminate the process if it is still running. Idempotent.
    pub async fn release(&mut self) {
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            terminate(&mut child, self.pid, &self.tool).await;
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        self.stdout.take();
        let Some(mut child) = self.child.take() else {
            return;
        };
        let stderr_task = self.stderr_task.take();
        let tool = std::mem::take(&mut self.tool);
        let pid = self.pid;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    terminate(&mut child, pid, &tool).await;
                    if let Some(task) = stderr_task {
                        task.abort();
                    }
                });
            }
            Err(_) => {
                // No runtime to wait on; kill_on_drop reaps the rest.
                let _ = child.start_kill();
            }
        }
    }
}

/// Escalating termination. Every step runs unless the child has already
/// exited.
async fn terminate(child: &mut Child, pid: Option<u32>, tool: &str) {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(tool, pid = ?pid, %status, "Supervised process already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => tracing::debug!(tool, pid = ?pid, "try_wait failed: {}", e),
    }

    send_terminate(child, pid);
    if wait_for_exit(child, TERM_GRACE).await {
        tracing::debug!(tool, pid = ?pid, "Supervised process stopped after SIGTERM");
        return;
    }

    tracing::warn!(tool, pid = ?pid, "Supervised process ignored SIGTERM, killing");
    if let Err(e) = child.start_kill() {
        tracing::debug!(tool, pid = ?pid, "start_kill failed: {}", e);
    }
    if wait_for_exit(child, KILL_GRACE).await {
        return;
    }

    tracing::error!(tool, pid = ?pid, "Supervised process survived SIGKILL, killing process group");
    kill_process_group(pid);
    if !wait_for_exit(child, KILL_GRACE / 2).await {
        tracing::error!(tool, pid = ?pid, "Supervised process could not be reaped");
    }
}

async fn wait_for_exit(child: &mut Child, grace: Duration) -> bool {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(_status)) => true,
        // The child is gone or already reaped.
        Ok(Err(_)) => true,
        Err(_elapsed) => false,
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match pid {
        Some(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!(pid, "SIGTERM failed: {}", e);
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!(pid, "killpg failed: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Whether a diagnostic line should reach the operator log.
pub fn is_error_line(line: &str) -> bool {
    line.to_ascii_lowercase().contains("error")
}

async fn drain_stderr(tool: String, pid: Option<u32>, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if is_error_line(&line) {
                    tracing::warn!(tool = %tool, pid = ?pid, "{}", line);
                } else {
                    tracing::trace!(tool = %tool, pid = ?pid, "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(tool = %tool, pid = ?pid, "stderr drain stopped: {}", e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    use std::path::PathBuf;
    use std::time::Instant;

    fn sh(script: &str, read_timeout: Duration) -> SupervisedProcess {
        SupervisedProcess::spawn(
            &PathBuf::from("sh"),
            &["-c".to_string(), script.to_string()],
            read_timeout,
        )
        .unwrap()
    }

    fn is_running(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[test]
    fn error_lines_are_detected_case_insensitively() {
        assert!(is_error_line("[aac @ 0x1] Error while decoding"));
        assert!(is_error_line("Conversion failed: error"));
        assert!(!is_error_line("frame=  100 fps= 25 q=28.0"));
    }

    #[tokio::test]
    async fn reads_stdout_until_eof() {
        let mut process = sh("printf hello; printf oops >&2", DEFAULT_READ_TIMEOUT);
        let mut collected = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = process.read_chunk(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"hello");
        process.release().await;
        assert!(process.is_released());
    }

    async fn read_to_end(process: &mut SupervisedProcess) -> Vec<u8> {
        let mut collected = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = process.read_chunk(&mut buf).await.unwrap();
            if n == 0 {
                return collected;
            }
            collected.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn finish_reports_clean_exit() {
        let mut process = sh("printf done", DEFAULT_READ_TIMEOUT);
        assert_eq!(read_to_end(&mut process).await, b"done");
        process.finish().await.unwrap();
        assert!(process.is_released());
        // Nothing left to release.
        process.release().await;
    }

    #[tokio::test]
    async fn finish_reports_crash_after_partial_output() {
        let mut process = sh("printf partial; exit 3", DEFAULT_READ_TIMEOUT);
        assert_eq!(read_to_end(&mut process).await, b"partial");
        let err = process.finish().await.unwrap_err();
        assert_matches!(err, Error::ToolFailed { .. });
        assert!(err.to_string().contains('3'));
    }

    #[tokio::test]
    async fn finish_kills_process_that_outlives_its_output() {
        let mut process = sh("exec >&-; sleep 10", DEFAULT_READ_TIMEOUT);
        let pid = process.pid().unwrap();
        assert!(read_to_end(&mut process).await.is_empty());

        let started = Instant::now();
        assert_matches!(process.finish().await, Err(Error::ToolFailed { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn silent_process_hits_read_timeout() {
        let mut process = sh("sleep 5", Duration::from_millis(200));
        let mut buf = [0u8; 16];
        let result = process.read_chunk(&mut buf).await;
        assert_matches!(result, Err(Error::ReadTimeout { .. }));
        process.release().await;
    }

    #[tokio::test]
    async fn release_terminates_within_three_seconds() {
        let mut process = sh("while true; do sleep 0.1; done", DEFAULT_READ_TIMEOUT);
        let pid = process.pid().unwrap();
        assert!(is_running(pid));

        let started = Instant::now();
        process.release().await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn release_escalates_when_sigterm_is_ignored() {
        let mut process = sh(
            "trap '' TERM; while true; do sleep 0.1; done",
            DEFAULT_READ_TIMEOUT,
        );
        let pid = process.pid().unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        process.release().await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let mut process = sh("sleep 5", DEFAULT_READ_TIMEOUT);
        process.release().await;
        process.release().await;
        assert!(process.is_released());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drop_without_release_still_terminates() {
        let process = sh("while true; do sleep 0.1; done", DEFAULT_READ_TIMEOUT);
        let pid = process.pid().unwrap();
        drop(process);

        let deadline = Instant::now() + Duration::from_secs(3);
        while is_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_running(pid));
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let result = SupervisedProcess::spawn(
            &PathBuf::from("nonexistent_transcoder_xyz"),
            &[],
            DEFAULT_READ_TIMEOUT,
        );
        assert_matches!(result, Err(Error::ToolNotFound { .. }));
    }
}
