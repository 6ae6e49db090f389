//! ProcessSupervisor - compositor process lifecycle
//!
//! ## Responsibilities
//!
//! - Launch the compositor from a rendered [`Invocation`] and confirm it
//!   survives the startup grace period
//! - Keep at most one compositor alive: the previous session is confirmed
//!   terminated before the next one is spawned
//! - Health checks, graceful stop with forced-kill fallback
//! - Restart policy: consecutive failure counter, backoff, give-up limit
//!
//! ## Design Principles
//!
//! - The session slot is a single `Mutex<Option<_>>`; start/stop serialize
//!   on it, so two launches can never overlap
//! - Child processes are always spawned `kill_on_drop`

mod process;
mod relay;
mod types;

pub use process::ManagedProcess;
pub use relay::RelaySettings;
pub use types::*;

use crate::display_session::CursorGuard;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One running compositor
pub struct SupervisorSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    restart_count: u32,
    process: ManagedProcess,
}

impl SupervisorSession {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            started_at: self.started_at,
            pid: self.process.pid(),
            restart_count: self.restart_count,
        }
    }
}

/// ProcessSupervisor instance
pub struct ProcessSupervisor {
    session: Mutex<Option<SupervisorSession>>,
    options: LaunchOptions,
    policy: RestartPolicy,
    hide_cursor: bool,
    cursor: Mutex<Option<CursorGuard>>,
    failures: AtomicU32,
    launches: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ProcessSupervisor {
    pub fn new(options: LaunchOptions, policy: RestartPolicy) -> Self {
        Self {
            session: Mutex::new(None),
            options,
            policy,
            hide_cursor: false,
            cursor: Mutex::new(None),
            failures: AtomicU32::new(0),
            launches: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Hide the console cursor after the first successful launch
    pub fn with_cursor_hiding(mut self, enabled: bool) -> Self {
        self.hide_cursor = enabled;
        self
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Launch a compositor, replacing any running session
    ///
    /// Exit within the grace period is `Error::Launch` carrying the
    /// captured output; no session is left behind in that case.
    pub async fn start(&self, invocation: &Invocation) -> Result<SessionInfo> {
        let mut slot = self.session.lock().await;

        if let Some(mut previous) = slot.take() {
            tracing::info!(session_id = %previous.id, "Replacing compositor session");
            self.release(&mut previous).await;
        }

        let attempt = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            attempt = attempt,
            failures = self.failures(),
            command = %invocation.command_line(),
            "Launching compositor"
        );

        let mut process = ManagedProcess::spawn("compositor", invocation, &self.options)?;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Err(e) = process.confirm_started(self.options.grace).await {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }

        let session = SupervisorSession {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            restart_count: self.failures(),
            process,
        };
        let info = session.info();
        *slot = Some(session);
        drop(slot);

        if self.hide_cursor {
            let mut cursor = self.cursor.lock().await;
            if cursor.is_none() {
                *cursor = Some(CursorGuard::hide().await);
            }
        }

        tracing::info!(session_id = %info.id, pid = ?info.pid, "Compositor running");
        Ok(info)
    }

    /// True while a session exists and its process has not exited
    pub async fn is_healthy(&self) -> bool {
        let mut slot = self.session.lock().await;
        match slot.as_mut() {
            Some(session) => session.process.is_alive(),
            None => false,
        }
    }

    /// Exit status and captured output of a dead session
    pub async fn exit_report(&self) -> Option<(String, Vec<String>)> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut()?;
        let status = session.process.poll_exit()?;
        let diagnostics = session.process.settled_diagnostics().await;
        Some((status, diagnostics))
    }

    pub async fn current(&self) -> Option<SessionInfo> {
        self.session.lock().await.as_ref().map(SupervisorSession::info)
    }

    /// Stop the session and restore the console; idempotent
    pub async fn stop(&self) -> StopOutcome {
        let outcome = {
            let mut slot = self.session.lock().await;
            match slot.take() {
                Some(mut session) => self.release(&mut session).await,
                None => StopOutcome::AlreadyStopped,
            }
        };

        if let Some(mut cursor) = self.cursor.lock().await.take() {
            cursor.restore().await;
        }

        outcome
    }

    async fn release(&self, session: &mut SupervisorSession) -> StopOutcome {
        let outcome = session.process.terminate(self.options.stop_timeout).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        tracing::info!(
            session_id = %session.id,
            uptime_secs = session.process.uptime().as_secs(),
            outcome = ?outcome,
            "Compositor stopped"
        );
        outcome
    }

    // ========================================
    // Restart policy
    // ========================================

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Count one failure; reaching the limit is fatal
    pub fn register_failure(&self) -> Result<u32> {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.policy.max_retries {
            tracing::error!(
                failures = failures,
                max_retries = self.policy.max_retries,
                "Compositor restart limit reached"
            );
            return Err(Error::MaxRetriesExceeded { attempts: failures });
        }
        tracing::warn!(
            failures = failures,
            max_retries = self.policy.max_retries,
            "Compositor failure registered"
        );
        Ok(failures)
    }

    pub fn reset_backoff(&self) {
        let previous = self.failures.swap(0, Ordering::SeqCst);
        if previous > 0 {
            tracing::debug!(previous = previous, "Restart counter reset");
        }
    }

    /// Clear the failure counter once the session has been healthy for
    /// `stable_after`
    pub async fn reset_if_stable(&self) -> bool {
        if self.failures() == 0 {
            return false;
        }
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            return false;
        };
        if session.process.is_alive() && session.process.uptime() >= self.policy.stable_after {
            self.failures.store(0, Ordering::SeqCst);
            tracing::info!(session_id = %session.id, "Compositor stable, restart counter reset");
            return true;
        }
        false
    }

    /// Sleep the backoff delay for `failures`; false if cancelled
    pub async fn backoff(&self, failures: u32, cancel: &CancellationToken) -> bool {
        let delay = self.policy.delay_for(failures);
        tracing::info!(delay_ms = delay.as_millis() as u64, failures = failures, "Waiting before restart");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Launch, retrying launch errors with backoff until the limit
    pub async fn relaunch(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<LaunchResult> {
        loop {
            if cancel.is_cancelled() {
                return Ok(LaunchResult::Cancelled);
            }
            match self.start(invocation).await {
                Ok(info) => return Ok(LaunchResult::Started(info)),
                Err(e @ Error::Launch { .. }) => {
                    if let Error::Launch { diagnostics, .. } = &e {
                        for line in diagnostics.iter().rev().take(5).rev() {
                            tracing::error!(output = %line, "Compositor output");
                        }
                    }
                    tracing::error!(error = %e, "Compositor launch failed");
                    let failures = self.register_failure()?;
                    if !self.backoff(failures, cancel).await {
                        return Ok(LaunchResult::Cancelled);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ========================================
    // Instrumentation
    // ========================================

    /// Total spawn attempts
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Compositor processes currently alive or being confirmed
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest simultaneous process count ever observed
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}
