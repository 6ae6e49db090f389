//! ProcessSupervisor types

use crate::config_store::{BackoffConfig, BackoffKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Fully derived external process invocation
///
/// Equality is byte-for-byte on program, arguments and environment, which
/// lets the recovery loop detect no-op recompositions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on the child
    pub env: Vec<(String, String)>,
    /// Variables removed from the inherited environment
    pub env_remove: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            env_remove: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Printable command line for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|a| {
                if a.is_empty() || a.contains(|c: char| c.is_whitespace() || c == ';' || c == '\'') {
                    format!("'{}'", a.replace('\'', "'\\''"))
                } else {
                    a.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Declared launch options
///
/// Replaces ad hoc child-side signal tweaks: process-group isolation keeps
/// terminal SIGINT away from the child, niceness is applied before exec.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Put the child in its own process group
    pub process_group: bool,
    /// Scheduling priority (negative = higher); failures are ignored
    pub niceness: Option<i32>,
    /// How long the child must stay alive before a launch counts
    pub grace: Duration,
    /// Graceful stop bound before SIGKILL
    pub stop_timeout: Duration,
    /// Lines of stdout/stderr kept for diagnostics
    pub diagnostic_lines: usize,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            process_group: true,
            niceness: None,
            grace: Duration::from_secs(3),
            stop_timeout: Duration::from_secs(10),
            diagnostic_lines: 50,
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// stop() was already called (or there is no session)
    AlreadyStopped,
    /// The process had exited on its own
    AlreadyExited(String),
    /// Exited after SIGTERM
    Terminated(String),
    /// Did not exit in time and was killed
    Killed,
}

/// Restart policy for the compositor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub kind: BackoffKind,
    pub base: Duration,
    pub max: Duration,
    /// Consecutive failures that make the supervisor give up
    pub max_retries: u32,
    /// Healthy uptime that clears the failure counter
    pub stable_after: Duration,
}

impl RestartPolicy {
    pub fn from_config(backoff: &BackoffConfig, max_retries: u32) -> Self {
        Self {
            kind: backoff.kind,
            base: Duration::from_millis(backoff.base_ms),
            max: Duration::from_millis(backoff.max_ms.max(backoff.base_ms)),
            max_retries,
            stable_after: Duration::from_secs(backoff.stable_after_secs),
        }
    }

    /// Delay before attempt number `failures + 1`
    pub fn delay_for(&self, failures: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.base,
            BackoffKind::Exponential => {
                let shift = failures.saturating_sub(1).min(16);
                self.base.saturating_mul(1u32 << shift).min(self.max)
            }
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default(), 3)
    }
}

/// Public view of the active session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
    /// Consecutive failures before this session started
    pub restart_count: u32,
}

/// Outcome of a relaunch sequence
#[derive(Debug, Clone)]
pub enum LaunchResult {
    Started(SessionInfo),
    /// Shutdown was requested while waiting
    Cancelled,
}
