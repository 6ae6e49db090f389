//! RecoveryLoop - the control loop
//!
//! ## Responsibilities
//!
//! - Startup: probe every camera once, start relays, launch the compositor
//! - Every `monitor_interval`: re-probe failed cameras whose retry interval
//!   has elapsed, reap dead relays, check compositor health
//! - Turn those observations into at most one recomposition per tick
//! - Shutdown: compositor first, then relays, each with its own grace
//!
//! ## Triggers
//!
//! | Trigger | Cause | Backoff counter |
//! |---|---|---|
//! | `MembershipChanged` | a camera entered or left `Live` | reset |
//! | `ProcessFailure` | compositor exited on its own | incremented |
//!
//! When both happen in the same tick it counts as `MembershipChanged`.


use crate::camera_registry::{CameraRegistry, CameraSpec, CameraState, FailureCause};
use crate::compositor::{render, DisplayPlan, PlanBuilder, RenderOptions};
use crate::config_store::{DisplayConfig, OutputConfig, SupervisorConfig};
use crate::display_session::DisplayEnvironment;
use crate::error::{Error, Result};
use crate::placeholder::PlaceholderProvider;
use crate::process_supervisor::{
    LaunchOptions, LaunchResult, ProcessSupervisor, RelaySettings, RestartPolicy,
};
use crate::stream_prober::{probe_all, probe_for, ProbeOutcome, StreamProbe};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Why a recomposition happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    MembershipChanged,
    ProcessFailure,
}

/// Loop timing and probe parameters
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub probe_concurrency: usize,
    pub enable_camera_retry: bool,
    pub status_log_interval: Duration,
    pub show_loading_placeholders: bool,
    pub surface: (u32, u32),
}

impl RecoverySettings {
    pub fn from_config(display: &DisplayConfig) -> Self {
        Self {
            interval: Duration::from_secs(display.monitor_interval),
            probe_timeout: Duration::from_secs(display.probe_timeout),
            probe_concurrency: display.probe_concurrency,
            enable_camera_retry: display.enable_camera_retry,
            status_log_interval: Duration::from_secs(display.status_log_interval_secs),
            show_loading_placeholders: display.show_loading_placeholders,
            surface: (display.screen_width, display.screen_height),
        }
    }
}

/// Counters for status logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub recompositions: u64,
    pub recoveries: u64,
    /// Compositor deaths seen by `tick`, whichever trigger won
    pub process_failures: u64,
}

/// RecoveryLoop instance
pub struct RecoveryLoop {
    registry: Arc<CameraRegistry>,
    prober: Arc<dyn StreamProbe>,
    builder: PlanBuilder,
    render_options: RenderOptions,
    supervisor: Arc<ProcessSupervisor>,
    relay: Option<(RelaySettings, LaunchOptions)>,
    settings: RecoverySettings,
    current_plan: Mutex<Option<DisplayPlan>>,
    stats: Mutex<LoopStats>,
    last_status_log: Mutex<Instant>,
}

impl RecoveryLoop {
    pub fn new(
        registry: Arc<CameraRegistry>,
        prober: Arc<dyn StreamProbe>,
        builder: PlanBuilder,
        render_options: RenderOptions,
        supervisor: Arc<ProcessSupervisor>,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            registry,
            prober,
            builder,
            render_options,
            supervisor,
            relay: None,
            settings,
            current_plan: Mutex::new(None),
            stats: Mutex::new(LoopStats::default()),
            last_status_log: Mutex::new(Instant::now()),
        }
    }

    /// Enable per-camera relays
    pub fn with_relay(mut self, relay: Option<RelaySettings>, options: LaunchOptions) -> Self {
        self.relay = relay.map(|r| (r, options));
        self
    }

    /// Assemble every component from a parsed layout file
    pub async fn from_config(config: &SupervisorConfig) -> Result<Self> {
        let display = &config.display;

        let registry = CameraRegistry::load(config.camera_specs(), config.surface())?
            .with_retry_interval(Duration::from_secs(display.camera_retry_interval));

        let environment = DisplayEnvironment::resolve(&display.output).await?;

        let placeholders = if display.show_placeholders {
            PlaceholderProvider::new(
                display.placeholder_image.as_deref(),
                &display.placeholder_bg_color,
                &display.placeholder_text_color,
                display.placeholder_labels,
            )
        } else {
            PlaceholderProvider::new(None, "black", &display.placeholder_text_color, false)
        };

        let network_timeout = Duration::from_secs(display.network_timeout);
        let relay = display
            .relay
            .as_ref()
            .map(|r| RelaySettings::from_config(r, network_timeout));
        let builder = PlanBuilder::new(placeholders).with_relay(relay.clone());

        let render_options = RenderOptions {
            program: display.compositor_program.clone(),
            latency: display.latency_profile,
            network_timeout,
            sink: (&display.output).into(),
            environment,
        };

        let options = LaunchOptions {
            process_group: true,
            niceness: display.niceness,
            grace: Duration::from_millis(display.launch_grace_ms),
            stop_timeout: Duration::from_secs(display.stop_timeout),
            ..LaunchOptions::default()
        };
        let policy = RestartPolicy::from_config(&display.backoff, display.restart_retries);
        let hide_cursor =
            display.hide_cursor && matches!(display.output, OutputConfig::Framebuffer { .. });
        let supervisor =
            ProcessSupervisor::new(options.clone(), policy).with_cursor_hiding(hide_cursor);

        let prober = probe_for(display.probe_method, &display.compositor_program);

        Ok(Self::new(
            Arc::new(registry),
            prober,
            builder,
            render_options,
            Arc::new(supervisor),
            RecoverySettings::from_config(display),
        )
        .with_relay(relay, options))
    }

    pub fn registry(&self) -> &Arc<CameraRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub async fn stats(&self) -> LoopStats {
        *self.stats.lock().await
    }

    /// Plan of the running session
    pub async fn current_plan(&self) -> Option<DisplayPlan> {
        self.current_plan.lock().await.clone()
    }

    // ========================================
    // Run / shutdown
    // ========================================

    /// Run until cancelled or a fatal error, then shut down
    ///
    /// Shutdown always runs, also after a fatal error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let result = self.supervise(&cancel).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Recovery loop stopped");
        }
        self.shutdown().await;
        result
    }

    async fn supervise(&self, cancel: &CancellationToken) -> Result<()> {
        self.startup(cancel).await?;

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            "Recovery loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // Not raced against cancel: a probe batch always settles
            self.tick(cancel).await?;
        }

        tracing::info!("Recovery loop cancelled");
        Ok(())
    }

    /// Initial probe batch and first launch
    pub async fn startup(&self, cancel: &CancellationToken) -> Result<()> {
        if self.settings.show_loading_placeholders && !cancel.is_cancelled() {
            let snapshot = self.registry.snapshot().await;
            let plan = self.builder.loading(&snapshot);
            tracing::info!(cameras = plan.len(), "Showing loading placeholders");
            self.launch(plan, cancel).await?;
        }

        let untested = self.registry.untested_specs().await;
        self.probe_batch(untested).await;

        if cancel.is_cancelled() {
            return Ok(());
        }

        self.sync_relays().await;
        let snapshot = self.registry.snapshot().await;
        let plan = self.builder.build(&snapshot);
        self.launch(plan, cancel).await
    }

    /// Stop the compositor, then every relay
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");

        let outcome = self.supervisor.stop().await;
        tracing::info!(outcome = ?outcome, "Compositor shut down");

        let relays = self.registry.take_all_relays().await;
        if relays.is_empty() {
            return;
        }
        let timeout = self.relay_stop_timeout();
        let stopped = futures::future::join_all(relays.into_iter().map(|(camera_id, mut process)| async move {
            let outcome = process.terminate(timeout).await;
            (camera_id, outcome)
        }))
        .await;
        for (camera_id, outcome) in stopped {
            tracing::info!(camera_id = %camera_id, outcome = ?outcome, "Relay shut down");
        }
    }

    fn relay_stop_timeout(&self) -> Duration {
        self.relay
            .as_ref()
            .map(|(_, options)| options.stop_timeout)
            .unwrap_or_else(|| self.supervisor.options().stop_timeout)
    }

    // ========================================
    // One cycle
    // ========================================

    /// One monitoring cycle; returns the trigger acted on
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<Option<Trigger>> {
        self.stats.lock().await.ticks += 1;
        let mut membership_changed = false;

        for dead in self.registry.reap_dead_relays().await {
            tracing::warn!(camera_id = %dead.camera_id, status = %dead.status, "Relay exited");
            let mut process = dead.process;
            for line in process.settled_diagnostics().await.iter().rev().take(3).rev() {
                tracing::warn!(camera_id = %dead.camera_id, output = %line, "Relay output");
            }
            if self.fail_camera(&dead.camera_id, FailureCause::ProcessDied).await {
                membership_changed = true;
            }
        }

        if self.settings.enable_camera_retry {
            let due = self.registry.due_for_retry(Instant::now()).await;
            if !due.is_empty() {
                tracing::debug!(cameras = due.len(), "Re-probing failed cameras");
                let recovered = self.probe_batch(due).await;
                if recovered > 0 {
                    self.stats.lock().await.recoveries += recovered as u64;
                    membership_changed = true;
                }
            }
        }

        if membership_changed && self.sync_relays().await {
            tracing::debug!("Relay start failures during recovery");
        }

        let process_failed = !self.supervisor.is_healthy().await;

        let trigger = if membership_changed {
            Some(Trigger::MembershipChanged)
        } else if process_failed {
            Some(Trigger::ProcessFailure)
        } else {
            None
        };

        if process_failed {
            self.stats.lock().await.process_failures += 1;
            self.log_exit_report().await;
        }

        match trigger {
            Some(Trigger::MembershipChanged) => {
                self.supervisor.reset_backoff();
                self.recompose(Trigger::MembershipChanged, cancel).await?;
            }
            Some(Trigger::ProcessFailure) => {
                let failures = self.supervisor.register_failure()?;
                self.verify_live().await;
                self.sync_relays().await;
                if self.supervisor.backoff(failures, cancel).await {
                    self.recompose(Trigger::ProcessFailure, cancel).await?;
                }
            }
            None => {
                self.supervisor.reset_if_stable().await;
            }
        }

        self.log_status_if_due().await;
        Ok(trigger)
    }

    /// Log why the compositor died, before its session is replaced
    async fn log_exit_report(&self) {
        if let Some((status, output)) = self.supervisor.exit_report().await {
            let err = Error::ProcessDied {
                label: "compositor".to_string(),
                status,
            };
            tracing::error!(error = %err, code = err.code(), "Compositor exited");
            for line in output.iter().rev().take(10).rev() {
                tracing::error!(output = %line, "Compositor output");
            }
        }
    }

    /// Build, render and (re)launch unless nothing would change
    async fn recompose(&self, trigger: Trigger, cancel: &CancellationToken) -> Result<()> {
        let snapshot = self.registry.snapshot().await;
        let plan = self.builder.build(&snapshot);

        if trigger == Trigger::MembershipChanged {
            let unchanged = self.current_plan.lock().await.as_ref() == Some(&plan);
            if unchanged && self.supervisor.is_healthy().await {
                tracing::debug!("Plan unchanged, keeping session");
                return Ok(());
            }
        }

        tracing::info!(
            trigger = ?trigger,
            live = plan.live_count(),
            placeholders = plan.placeholder_count(),
            "Recomposing"
        );
        self.launch(plan, cancel).await
    }

    async fn launch(&self, plan: DisplayPlan, cancel: &CancellationToken) -> Result<()> {
        for line in plan.layout_lines() {
            tracing::info!(layout = %line, "Camera layout");
        }
        tracing::debug!(plan = %serde_json::to_string(&plan)?, "Display plan");
        let invocation = render(&plan, self.settings.surface, &self.render_options);
        self.stats.lock().await.recompositions += 1;

        match self.supervisor.relaunch(&invocation, cancel).await? {
            LaunchResult::Started(info) => {
                tracing::debug!(session_id = %info.id, "Session plan recorded");
                *self.current_plan.lock().await = Some(plan);
            }
            LaunchResult::Cancelled => {
                tracing::info!("Launch abandoned, shutdown requested");
            }
        }
        Ok(())
    }

    // ========================================
    // Probing
    // ========================================

    /// Probe a batch and apply the outcomes; returns how many went Live
    async fn probe_batch(&self, specs: Vec<CameraSpec>) -> usize {
        let mut to_probe = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.registry.transition(&spec.id, CameraState::Probing).await {
                Ok(_) => to_probe.push(spec),
                Err(e) => tracing::debug!(camera_id = %spec.id, error = %e, "Probe skipped"),
            }
        }
        if to_probe.is_empty() {
            return 0;
        }

        let reports = probe_all(
            self.prober.clone(),
            to_probe,
            self.settings.probe_timeout,
            self.settings.probe_concurrency,
        )
        .await;

        let mut live = 0;
        for report in reports {
            let next = match report.outcome.failure_cause() {
                None => CameraState::Live,
                Some(cause) => CameraState::Failed(cause),
            };
            match self.registry.transition(&report.camera_id, next).await {
                Ok(_) if next.is_live() => live += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(camera_id = %report.camera_id, error = %e, "Probe result dropped"),
            }
        }
        live
    }

    /// Re-probe Live cameras after a compositor death
    async fn verify_live(&self) {
        let live = self.registry.live_specs().await;
        if live.is_empty() {
            return;
        }
        let reports = probe_all(
            self.prober.clone(),
            live,
            self.settings.probe_timeout,
            self.settings.probe_concurrency,
        )
        .await;
        for report in reports {
            if report.outcome != ProbeOutcome::Reachable {
                if let Some(cause) = report.outcome.failure_cause() {
                    self.fail_camera(&report.camera_id, cause).await;
                }
            }
        }
    }

    /// `Live -> Failed(cause)`; false if the camera was not Live
    async fn fail_camera(&self, camera_id: &str, cause: FailureCause) -> bool {
        match self.registry.state(camera_id).await {
            Ok(CameraState::Live) => self
                .registry
                .transition(camera_id, CameraState::Failed(cause))
                .await
                .is_ok(),
            _ => false,
        }
    }

    // ========================================
    // Relays
    // ========================================

    /// Start relays for Live cameras, stop them for the rest
    ///
    /// A relay that fails to start fails its camera. Returns true if that
    /// happened.
    async fn sync_relays(&self) -> bool {
        let Some((settings, options)) = &self.relay else {
            return false;
        };

        let mut failed = false;
        for snap in self.registry.snapshot().await {
            if !snap.spec.enabled {
                continue;
            }
            let has_relay = self.registry.has_relay(&snap.spec.id).await.unwrap_or(false);

            if snap.state.is_live() && !has_relay {
                match settings.start(&snap.spec, snap.slot, options).await {
                    Ok(process) => {
                        if let Ok(Some(mut stale)) = self.registry.attach_relay(&snap.spec.id, process).await {
                            stale.terminate(options.stop_timeout).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(camera_id = %snap.spec.id, error = %e, "Relay failed to start");
                        if self.fail_camera(&snap.spec.id, FailureCause::ProcessDied).await {
                            failed = true;
                        }
                    }
                }
            } else if !snap.state.is_live() && has_relay {
                if let Ok(Some(mut process)) = self.registry.take_relay(&snap.spec.id).await {
                    let outcome = process.terminate(options.stop_timeout).await;
                    tracing::info!(camera_id = %snap.spec.id, outcome = ?outcome, "Relay stopped");
                }
            }
        }
        failed
    }

    // ========================================
    // Status
    // ========================================

    async fn log_status_if_due(&self) {
        {
            let mut last = self.last_status_log.lock().await;
            if last.elapsed() < self.settings.status_log_interval {
                return;
            }
            *last = Instant::now();
        }

        let counts = self.registry.counts().await;
        let stats = self.stats().await;
        let session = self.supervisor.current().await;
        tracing::info!(
            live = counts.live,
            failed = counts.failed,
            probing = counts.probing,
            untested = counts.untested,
            session_id = ?session.as_ref().map(|s| s.id),
            restarts = self.supervisor.failures(),
            recompositions = stats.recompositions,
            "Status"
        );
    }
}
