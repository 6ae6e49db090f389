//! CameraRegistry - camera specs and connectivity state
//!
//! ## Responsibilities
//!
//! - Validate camera specs once at load (unique names, in-bounds rectangles)
//! - Own every camera's runtime state behind a single lock
//! - Expose atomic snapshots for plan derivation
//! - `transition` is the only way to change a camera's state
//! - Own per-camera relay process handles (relay mode)
//!
//! ## Design Principles
//!
//! - SSoT: membership ("is this camera live") is a state lookup, never a
//!   separate working list
//! - Specs are immutable and live outside the lock; runtimes live inside it

mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::process_supervisor::ManagedProcess;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default minimum time between probes of a failed camera
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 30;

/// Relay that was found dead and detached from its camera
pub struct DeadRelay {
    pub camera_id: String,
    pub status: String,
    pub process: ManagedProcess,
}

/// CameraRegistry instance
pub struct CameraRegistry {
    /// Declaration order
    specs: Vec<CameraSpec>,
    /// camera id -> slot
    index: HashMap<String, usize>,
    /// Runtimes, same order as `specs`
    runtimes: RwLock<Vec<CameraRuntime>>,
    retry_interval: Duration,
}

impl CameraRegistry {
    /// Validate specs and create the registry (all cameras `Untested`)
    pub fn load(specs: Vec<CameraSpec>, surface: (u32, u32)) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.id.trim().is_empty() {
                return Err(Error::Config("camera name must not be empty".to_string()));
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(Error::Config(format!("duplicate camera name: {}", spec.id)));
            }
            if !spec.rect.fits_within(surface) {
                return Err(Error::Config(format!(
                    "camera {} rectangle {} outside surface {}x{}",
                    spec.id, spec.rect, surface.0, surface.1
                )));
            }
        }

        if !specs.iter().any(|s| s.enabled) {
            return Err(Error::Config("no enabled cameras".to_string()));
        }

        let index = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let runtimes = specs.iter().map(|_| CameraRuntime::default()).collect();

        tracing::info!(
            cameras = specs.len(),
            enabled = specs.iter().filter(|s| s.enabled).count(),
            "CameraRegistry loaded"
        );

        Ok(Self {
            specs,
            index,
            runtimes: RwLock::new(runtimes),
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
        })
    }

    /// Set the minimum interval between probes of a failed camera
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// All specs in declaration order
    pub fn specs(&self) -> &[CameraSpec] {
        &self.specs
    }

    pub fn slot_of(&self, camera_id: &str) -> Option<usize> {
        self.index.get(camera_id).copied()
    }

    fn slot(&self, camera_id: &str) -> Result<usize> {
        self.slot_of(camera_id)
            .ok_or_else(|| Error::UnknownCamera(camera_id.to_string()))
    }

    /// Consistent read of every camera (one read lock)
    pub async fn snapshot(&self) -> Vec<CameraSnapshot> {
        let runtimes = self.runtimes.read().await;
        self.specs
            .iter()
            .zip(runtimes.iter())
            .enumerate()
            .map(|(slot, (spec, rt))| CameraSnapshot {
                slot,
                spec: spec.clone(),
                state: rt.state,
            })
            .collect()
    }

    /// Current state of one camera
    pub async fn state(&self, camera_id: &str) -> Result<CameraState> {
        let slot = self.slot(camera_id)?;
        Ok(self.runtimes.read().await[slot].state)
    }

    /// Apply one state-machine edge; returns the previous state
    ///
    /// - Illegal edges are rejected and leave the state untouched
    /// - `Failed -> Probing` is rejected until the retry interval has elapsed
    ///   since the last probe
    /// - Entering `Live`/`Failed` stamps the probe time
    pub async fn transition(&self, camera_id: &str, next: CameraState) -> Result<CameraState> {
        let slot = self.slot(camera_id)?;
        let mut runtimes = self.runtimes.write().await;
        let rt = &mut runtimes[slot];
        let prev = rt.state;

        if !prev.can_transition_to(&next) {
            return Err(Error::IllegalTransition {
                camera_id: camera_id.to_string(),
                from: prev.to_string(),
                to: next.to_string(),
            });
        }

        let now = Instant::now();
        if prev.is_failed() && next == CameraState::Probing {
            if let Some(last) = rt.last_probe {
                if now.duration_since(last) < self.retry_interval {
                    return Err(Error::IllegalTransition {
                        camera_id: camera_id.to_string(),
                        from: prev.to_string(),
                        to: format!("{} (retry interval not elapsed)", next),
                    });
                }
            }
        }

        rt.state = next;
        match next {
            CameraState::Live => {
                rt.last_probe = Some(now);
                rt.consecutive_failures = 0;
            }
            CameraState::Failed(_) => {
                rt.last_probe = Some(now);
                rt.consecutive_failures = rt.consecutive_failures.saturating_add(1);
            }
            CameraState::Untested | CameraState::Probing => {}
        }

        match (prev, next) {
            (CameraState::Probing, CameraState::Live) => {
                tracing::info!(camera_id = %camera_id, from = %prev, to = %next, "Camera live");
            }
            (CameraState::Live, CameraState::Failed(_)) => {
                tracing::warn!(camera_id = %camera_id, from = %prev, to = %next, "Camera lost");
            }
            _ => {
                tracing::debug!(camera_id = %camera_id, from = %prev, to = %next, "Camera state changed");
            }
        }

        Ok(prev)
    }

    /// Failed, enabled cameras whose last probe is at least one retry
    /// interval old at `now`
    pub async fn due_for_retry(&self, now: Instant) -> Vec<CameraSpec> {
        let runtimes = self.runtimes.read().await;
        self.specs
            .iter()
            .zip(runtimes.iter())
            .filter(|(spec, rt)| {
                spec.enabled
                    && rt.state.is_failed()
                    && rt
                        .last_probe
                        .map_or(true, |last| now.duration_since(last) >= self.retry_interval)
            })
            .map(|(spec, _)| spec.clone())
            .collect()
    }

    /// Enabled cameras currently Live
    pub async fn live_specs(&self) -> Vec<CameraSpec> {
        self.specs_in(|s| s.is_live()).await
    }

    /// Enabled cameras not yet tested
    pub async fn untested_specs(&self) -> Vec<CameraSpec> {
        self.specs_in(|s| *s == CameraState::Untested).await
    }

    async fn specs_in(&self, pred: impl Fn(&CameraState) -> bool) -> Vec<CameraSpec> {
        let runtimes = self.runtimes.read().await;
        self.specs
            .iter()
            .zip(runtimes.iter())
            .filter(|(spec, rt)| spec.enabled && pred(&rt.state))
            .map(|(spec, _)| spec.clone())
            .collect()
    }

    /// Consecutive failure count for one camera
    pub async fn consecutive_failures(&self, camera_id: &str) -> Result<u32> {
        let slot = self.slot(camera_id)?;
        Ok(self.runtimes.read().await[slot].consecutive_failures)
    }

    /// Counts over enabled cameras
    pub async fn counts(&self) -> StateCounts {
        let runtimes = self.runtimes.read().await;
        let mut counts = StateCounts::default();
        for (spec, rt) in self.specs.iter().zip(runtimes.iter()) {
            if !spec.enabled {
                continue;
            }
            match rt.state {
                CameraState::Untested => counts.untested += 1,
                CameraState::Probing => counts.probing += 1,
                CameraState::Live => counts.live += 1,
                CameraState::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }

    // ========================================
    // Relay handles
    // ========================================

    /// Attach a relay to a camera; an existing relay is handed back
    pub async fn attach_relay(
        &self,
        camera_id: &str,
        process: ManagedProcess,
    ) -> Result<Option<ManagedProcess>> {
        let slot = self.slot(camera_id)?;
        let mut runtimes = self.runtimes.write().await;
        Ok(runtimes[slot].relay.replace(process))
    }

    /// Detach a camera's relay (caller terminates it outside the lock)
    pub async fn take_relay(&self, camera_id: &str) -> Result<Option<ManagedProcess>> {
        let slot = self.slot(camera_id)?;
        let mut runtimes = self.runtimes.write().await;
        Ok(runtimes[slot].relay.take())
    }

    pub async fn has_relay(&self, camera_id: &str) -> Result<bool> {
        let slot = self.slot(camera_id)?;
        Ok(self.runtimes.read().await[slot].relay.is_some())
    }

    /// Detach every relay (shutdown)
    pub async fn take_all_relays(&self) -> Vec<(String, ManagedProcess)> {
        let mut runtimes = self.runtimes.write().await;
        self.specs
            .iter()
            .zip(runtimes.iter_mut())
            .filter_map(|(spec, rt)| rt.relay.take().map(|p| (spec.id.clone(), p)))
            .collect()
    }

    /// Detach relays whose process has exited
    pub async fn reap_dead_relays(&self) -> Vec<DeadRelay> {
        let mut runtimes = self.runtimes.write().await;
        let mut dead = Vec::new();

        for (spec, rt) in self.specs.iter().zip(runtimes.iter_mut()) {
            let status = match rt.relay.as_mut() {
                Some(process) => process.poll_exit(),
                None => None,
            };
            if let Some(status) = status {
                if let Some(process) = rt.relay.take() {
                    dead.push(DeadRelay {
                        camera_id: spec.id.clone(),
                        status,
                        process,
                    });
                }
            }
        }

        dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn spec(id: &str, x: u32, y: u32) -> CameraSpec {
        CameraSpec {
            id: id.to_string(),
            locator: format!("rtsp://192.168.1.10/{}", id),
            rect: Rect { x, y, width: 960, height: 540 },
            enabled: true,
        }
    }

    fn four_cameras() -> Vec<CameraSpec> {
        vec![
            spec("cam1", 0, 0),
            spec("cam2", 960, 0),
            spec("cam3", 0, 540),
            spec("cam4", 960, 540),
        ]
    }

    #[test]
    fn test_load_rejects_duplicate_names() {
        let mut specs = four_cameras();
        specs[3].id = "cam1".to_string();
        let err = CameraRegistry::load(specs, (1920, 1080)).err().unwrap();
        assert!(matches!(err, Error::Config(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_load_rejects_out_of_bounds() {
        let specs = vec![spec("cam1", 1000, 0)];
        let err = CameraRegistry::load(specs, (1920, 1080)).err().unwrap();
        assert!(matches!(err, Error::Config(ref m) if m.contains("outside surface")));
    }

    #[test]
    fn test_load_rejects_all_disabled() {
        let mut specs = four_cameras();
        specs.iter_mut().for_each(|s| s.enabled = false);
        assert!(CameraRegistry::load(specs, (1920, 1080)).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_order_and_initial_state() {
        let registry = CameraRegistry::load(four_cameras(), (1920, 1080)).unwrap();
        let snap = registry.snapshot().await;
        let ids: Vec<_> = snap.iter().map(|s| s.spec.id.as_str()).collect();
        assert_eq!(ids, ["cam1", "cam2", "cam3", "cam4"]);
        assert!(snap.iter().all(|s| s.state == CameraState::Untested));
        assert_eq!(snap[2].slot, 2);
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let registry = CameraRegistry::load(four_cameras(), (1920, 1080)).unwrap();

        // Untested -> Live skips Probing
        let err = registry.transition("cam1", CameraState::Live).await.unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
        assert_eq!(registry.state("cam1").await.unwrap(), CameraState::Untested);

        registry.transition("cam1", CameraState::Probing).await.unwrap();
        registry.transition("cam1", CameraState::Live).await.unwrap();

        // Live -> Probing is not an edge
        assert!(registry.transition("cam1", CameraState::Probing).await.is_err());
        assert_eq!(registry.state("cam1").await.unwrap(), CameraState::Live);
    }

    #[tokio::test]
    async fn test_unknown_camera() {
        let registry = CameraRegistry::load(four_cameras(), (1920, 1080)).unwrap();
        let err = registry.transition("nope", CameraState::Probing).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCamera(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_not_reprobed_before_interval() {
        let registry = CameraRegistry::load(four_cameras(), (1920, 1080))
            .unwrap()
            .with_retry_interval(Duration::from_secs(30));

        registry.transition("cam2", CameraState::Probing).await.unwrap();
        registry
            .transition("cam2", CameraState::Failed(FailureCause::Timeout))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(registry.due_for_retry(Instant::now()).await.is_empty());
        assert!(registry.transition("cam2", CameraState::Probing).await.is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let due = registry.due_for_retry(Instant::now()).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "cam2");
        registry.transition("cam2", CameraState::Probing).await.unwrap();
    }

    #[tokio::test]
    async fn test_counts_skip_disabled() {
        let mut specs = four_cameras();
        specs[1].enabled = false;
        let registry = CameraRegistry::load(specs, (1920, 1080)).unwrap();
        registry.transition("cam1", CameraState::Probing).await.unwrap();
        registry.transition("cam1", CameraState::Live).await.unwrap();

        let counts = registry.counts().await;
        assert_eq!(counts.live, 1);
        assert_eq!(counts.untested, 2);
        assert_eq!(counts.total(), 3);
        assert_eq!(registry.live_specs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_consecutive_failures_reset_on_live() {
        let registry = CameraRegistry::load(four_cameras(), (1920, 1080))
            .unwrap()
            .with_retry_interval(Duration::ZERO);

        registry.transition("cam3", CameraState::Probing).await.unwrap();
        registry
            .transition("cam3", CameraState::Failed(FailureCause::Unreachable))
            .await
            .unwrap();
        registry.transition("cam3", CameraState::Probing).await.unwrap();
        registry
            .transition("cam3", CameraState::Failed(FailureCause::Unreachable))
            .await
            .unwrap();
        assert_eq!(registry.consecutive_failures("cam3").await.unwrap(), 2);

        registry.transition("cam3", CameraState::Probing).await.unwrap();
        registry.transition("cam3", CameraState::Live).await.unwrap();
        assert_eq!(registry.consecutive_failures("cam3").await.unwrap(), 0);
    }

    /// Random requests against the registry: only legal edges may ever be
    /// observed between consecutive states.
    #[tokio::test]
    async fn test_random_requests_only_follow_edges() {
        let registry = CameraRegistry::load(four_cameras(), (1920, 1080))
            .unwrap()
            .with_retry_interval(Duration::ZERO);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let candidates = [
            CameraState::Untested,
            CameraState::Probing,
            CameraState::Live,
            CameraState::Failed(FailureCause::Timeout),
            CameraState::Failed(FailureCause::Unreachable),
            CameraState::Failed(FailureCause::ProcessDied),
        ];
        let ids = ["cam1", "cam2", "cam3", "cam4"];

        let mut applied = 0;
        for _ in 0..2000 {
            let id = ids[rng.gen_range(0..ids.len())];
            let next = candidates[rng.gen_range(0..candidates.len())];
            let before = registry.state(id).await.unwrap();

            match registry.transition(id, next).await {
                Ok(prev) => {
                    assert_eq!(prev, before);
                    assert!(before.can_transition_to(&next), "{} -> {}", before, next);
                    assert_eq!(registry.state(id).await.unwrap(), next);
                    applied += 1;
                }
                Err(_) => {
                    assert!(!before.can_transition_to(&next));
                    assert_eq!(registry.state(id).await.unwrap(), before);
                }
            }
        }
        assert!(applied > 100);
    }
}
