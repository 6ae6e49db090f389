//! StreamProber - bounded camera reachability checks
//!
//! ## Responsibilities
//!
//! - Decide whether a camera currently delivers data
//! - Bound every probe by a timeout (`TimedOut` is distinct from
//!   `Unreachable`)
//! - Fan out a batch of probes under a concurrency limit
//!
//! Probes never touch the registry; the caller applies the outcomes.

mod ffmpeg;
mod rtsp;

pub use ffmpeg::FfmpegProbe;
pub use rtsp::RtspOptionsProbe;

use crate::camera_registry::{CameraSpec, FailureCause};
use crate::config_store::ProbeMethod;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Result of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
    TimedOut,
}

impl ProbeOutcome {
    /// Failure cause for a non-reachable outcome
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            ProbeOutcome::Reachable => None,
            ProbeOutcome::Unreachable => Some(FailureCause::Unreachable),
            ProbeOutcome::TimedOut => Some(FailureCause::Timeout),
        }
    }
}

/// One camera's result within a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub camera_id: String,
    pub outcome: ProbeOutcome,
    pub elapsed: Duration,
}

/// Reachability check for one camera
pub trait StreamProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probe `spec`, finishing within `timeout`
    fn probe<'a>(&'a self, spec: &'a CameraSpec, timeout: Duration) -> BoxFuture<'a, ProbeOutcome>;
}

/// Probe implementation for a configured method
pub fn probe_for(method: ProbeMethod, program: &str) -> Arc<dyn StreamProbe> {
    match method {
        ProbeMethod::Ffmpeg => Arc::new(FfmpegProbe::new(program)),
        ProbeMethod::RtspOptions => Arc::new(RtspOptionsProbe::new(FfmpegProbe::new(program))),
    }
}

/// Probe a batch with at most `concurrency` in flight
///
/// Reports come back in input order. Each probe is additionally bounded
/// by `timeout` here, so a misbehaving implementation still resolves as
/// `TimedOut`.
pub async fn probe_all(
    probe: Arc<dyn StreamProbe>,
    specs: Vec<CameraSpec>,
    timeout: Duration,
    concurrency: usize,
) -> Vec<ProbeReport> {
    if specs.is_empty() {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let batch_started = Instant::now();

    let handles: Vec<_> = specs
        .iter()
        .cloned()
        .map(|spec| {
            let probe = probe.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let started = Instant::now();
                let outcome = match tokio::time::timeout(timeout, probe.probe(&spec, timeout)).await {
                    Ok(outcome) => outcome,
                    Err(_) => ProbeOutcome::TimedOut,
                };
                (outcome, started.elapsed())
            })
        })
        .collect();

    let results = futures::future::join_all(handles).await;

    let reports: Vec<ProbeReport> = specs
        .into_iter()
        .zip(results)
        .map(|(spec, joined)| {
            let (outcome, elapsed) = match joined {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(camera_id = %spec.id, error = %e, "Probe task failed");
                    (ProbeOutcome::Unreachable, Duration::ZERO)
                }
            };
            tracing::debug!(
                camera_id = %spec.id,
                outcome = ?outcome,
                elapsed_ms = elapsed.as_millis() as u64,
                "Probe finished"
            );
            ProbeReport {
                camera_id: spec.id,
                outcome,
                elapsed,
            }
        })
        .collect();

    tracing::info!(
        method = probe.name(),
        probed = reports.len(),
        reachable = reports.iter().filter(|r| r.outcome == ProbeOutcome::Reachable).count(),
        elapsed_ms = batch_started.elapsed().as_millis() as u64,
        "Probe batch finished"
    );

    reports
}
