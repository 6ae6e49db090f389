//! ManagedProcess - one supervised child process
//!
//! Spawned with `kill_on_drop(true)` so a dropped handle never leaves an
//! orphan behind. stdout/stderr are drained continuously into a bounded
//! tail; an undrained pipe would eventually block a chatty child.

use super::types::{Invocation, LaunchOptions, StopOutcome};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Wait for drain tasks after an exit before reading diagnostics
const DRAIN_SETTLE: Duration = Duration::from_millis(500);

type Tail = Arc<Mutex<VecDeque<String>>>;

/// Supervised child process
pub struct ManagedProcess {
    label: String,
    program: String,
    child: Child,
    pid: Option<u32>,
    exit: Option<String>,
    stopped: bool,
    tail: Tail,
    drains: Vec<JoinHandle<()>>,
    started: Instant,
}

impl ManagedProcess {
    /// Spawn the invocation (no liveness confirmation)
    pub fn spawn(
        label: impl Into<String>,
        invocation: &Invocation,
        options: &LaunchOptions,
    ) -> Result<Self> {
        let label = label.into();
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        for key in &invocation.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            if options.process_group {
                cmd.process_group(0);
            }
            if let Some(niceness) = options.niceness {
                // SAFETY: setpriority is async-signal-safe and touches no
                // parent state.
                unsafe {
                    cmd.pre_exec(move || {
                        libc::setpriority(libc::PRIO_PROCESS, 0, niceness);
                        Ok(())
                    });
                }
            }
        }

        let mut child = cmd.spawn().map_err(|e| Error::Launch {
            program: invocation.program.clone(),
            message: format!("spawn failed: {}", e),
            diagnostics: Vec::new(),
        })?;

        let tail: Tail = Arc::new(Mutex::new(VecDeque::with_capacity(options.diagnostic_lines)));
        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(drain(stdout, tail.clone(), options.diagnostic_lines));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain(stderr, tail.clone(), options.diagnostic_lines));
        }

        let pid = child.id();
        tracing::debug!(label = %label, pid = ?pid, "Process spawned");

        Ok(Self {
            label,
            program: invocation.program.clone(),
            child,
            pid,
            exit: None,
            stopped: false,
            tail,
            drains,
            started: Instant::now(),
        })
    }

    /// Spawn and require the child to survive `options.grace`
    pub async fn launch(
        label: impl Into<String>,
        invocation: &Invocation,
        options: &LaunchOptions,
    ) -> Result<Self> {
        let mut process = Self::spawn(label, invocation, options)?;
        process.confirm_started(options.grace).await?;
        Ok(process)
    }

    /// Wait out the grace period; an exit inside it is a launch error
    pub async fn confirm_started(&mut self, grace: Duration) -> Result<()> {
        let status = tokio::select! {
            status = self.child.wait() => status,
            _ = tokio::time::sleep(grace) => return Ok(()),
        };

        let status = match status {
            Ok(s) => s.to_string(),
            Err(e) => format!("wait error: {}", e),
        };
        self.exit = Some(status.clone());
        self.stopped = true;

        let diagnostics = self.settled_diagnostics().await;
        Err(Error::Launch {
            program: self.program.clone(),
            message: format!("{} exited during grace period ({})", self.label, status),
            diagnostics,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking exit check: `None` while running
    pub fn poll_exit(&mut self) -> Option<String> {
        if let Some(status) = &self.exit {
            return Some(status.clone());
        }
        let status = match self.child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            Ok(None) => return None,
            Err(e) => format!("wait error: {}", e),
        };
        self.exit = Some(status.clone());
        Some(status)
    }

    pub fn is_alive(&mut self) -> bool {
        self.poll_exit().is_none()
    }

    /// Last captured output lines
    pub async fn diagnostics(&self) -> Vec<String> {
        self.tail.lock().await.iter().cloned().collect()
    }

    /// Diagnostics after the drain tasks have had a chance to reach EOF
    pub async fn settled_diagnostics(&mut self) -> Vec<String> {
        for handle in self.drains.drain(..) {
            let _ = tokio::time::timeout(DRAIN_SETTLE, handle).await;
        }
        self.diagnostics().await
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL
    ///
    /// Idempotent: the second call returns `AlreadyStopped`.
    pub async fn terminate(&mut self, timeout: Duration) -> StopOutcome {
        if self.stopped {
            return StopOutcome::AlreadyStopped;
        }
        self.stopped = true;

        if let Some(status) = self.poll_exit() {
            tracing::debug!(label = %self.label, status = %status, "Process already exited");
            return StopOutcome::AlreadyExited(status);
        }

        self.request_terminate();

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                let status = status.to_string();
                self.exit = Some(status.clone());
                tracing::debug!(label = %self.label, status = %status, "Process terminated");
                StopOutcome::Terminated(status)
            }
            Ok(Err(e)) => {
                tracing::warn!(label = %self.label, error = %e, "Wait failed, killing");
                self.force_kill().await
            }
            Err(_) => {
                tracing::warn!(
                    label = %self.label,
                    timeout_ms = timeout.as_millis() as u64,
                    "Process ignored SIGTERM, killing"
                );
                self.force_kill().await
            }
        }
    }

    #[cfg(unix)]
    fn request_terminate(&mut self) {
        if let Some(pid) = self.pid {
            // SAFETY: the child has not been reaped yet (poll_exit returned
            // None), so the pid still refers to it.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn request_terminate(&mut self) {
        let _ = self.child.start_kill();
    }

    async fn force_kill(&mut self) -> StopOutcome {
        if let Err(e) = self.child.kill().await {
            tracing::error!(label = %self.label, error = %e, "SIGKILL failed");
        }
        self.exit = Some("killed".to_string());
        StopOutcome::Killed
    }
}

fn drain<R>(reader: R, tail: Tail, cap: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut tail = tail.lock().await;
            if tail.len() >= cap.max(1) {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(grace_ms: u64) -> LaunchOptions {
        LaunchOptions {
            grace: Duration::from_millis(grace_ms),
            stop_timeout: Duration::from_secs(2),
            ..LaunchOptions::default()
        }
    }

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_immediate_exit_is_launch_error_with_diagnostics() {
        let result = ManagedProcess::launch(
            "compositor",
            &sh("echo 'No such file or directory' >&2; exit 1"),
            &options(1000),
        )
        .await;

        match result {
            Err(Error::Launch { program, message, diagnostics }) => {
                assert_eq!(program, "sh");
                assert!(message.starts_with("compositor exited during grace period"));
                assert!(diagnostics.iter().any(|l| l.contains("No such file")));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("launch should fail"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let result = ManagedProcess::launch(
            "compositor",
            &Invocation::new("/nonexistent/camgrid-ffmpeg"),
            &options(100),
        )
        .await;
        assert!(matches!(result, Err(Error::Launch { .. })));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mut process = ManagedProcess::launch("sleeper", &Invocation::new("sleep").arg("30"), &options(100))
            .await
            .unwrap();
        assert!(process.is_alive());

        let first = process.terminate(Duration::from_secs(2)).await;
        assert!(matches!(first, StopOutcome::Terminated(_)));
        assert!(!process.is_alive());

        assert_eq!(process.terminate(Duration::from_secs(2)).await, StopOutcome::AlreadyStopped);
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let mut process = ManagedProcess::launch(
            "stubborn",
            &sh("trap '' TERM; while true; do sleep 1; done"),
            &options(300),
        )
        .await
        .unwrap();

        let outcome = process.terminate(Duration::from_millis(300)).await;
        assert_eq!(outcome, StopOutcome::Killed);
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_poll_exit_reports_status() {
        let mut process = ManagedProcess::spawn("short", &sh("exit 3"), &options(0)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = process.poll_exit().unwrap();
        assert!(status.contains('3'));
        assert!(matches!(
            process.terminate(Duration::from_secs(1)).await,
            StopOutcome::AlreadyExited(_)
        ));
    }

    #[tokio::test]
    async fn test_env_is_applied() {
        let mut inv = sh("echo \"mode=$CAMGRID_TEST_MODE display=${DISPLAY:-none}\"; sleep 5");
        inv.env.push(("CAMGRID_TEST_MODE".into(), "fb".into()));
        inv.env_remove.push("DISPLAY".into());

        let mut process = ManagedProcess::launch("env", &inv, &options(300)).await.unwrap();
        let lines = process.diagnostics().await;
        assert!(lines.iter().any(|l| l == "mode=fb display=none"), "{:?}", lines);
        process.terminate(Duration::from_secs(1)).await;
    }
}
