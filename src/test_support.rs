//! Shared helpers for unit tests

use crate::camera_registry::{CameraSpec, Rect};
use crate::stream_prober::{ProbeOutcome, StreamProbe};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Camera in quadrant `slot % 4` of a 1920x1080 surface
pub fn camera(id: &str, slot: u32) -> CameraSpec {
    let quadrant = slot % 4;
    CameraSpec {
        id: id.to_string(),
        locator: format!("rtsp://192.168.1.10/{}", id),
        rect: Rect {
            x: (quadrant % 2) * 960,
            y: (quadrant / 2) * 540,
            width: 960,
            height: 540,
        },
        enabled: true,
    }
}

pub fn camera_at(id: &str, locator: &str) -> CameraSpec {
    CameraSpec {
        locator: locator.to_string(),
        ..camera(id, 0)
    }
}

/// Executable `/bin/sh` script
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        file.sync_all().unwrap();
    }
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Probe double with per-camera outcomes (default `Reachable`)
#[derive(Default)]
pub struct ScriptedProbe {
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
    delay: Duration,
    calls: AtomicUsize,
    per_camera: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set(&self, camera_id: &str, outcome: ProbeOutcome) {
        self.outcomes.lock().unwrap().insert(camera_id.to_string(), outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, camera_id: &str) -> usize {
        self.per_camera.lock().unwrap().get(camera_id).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl StreamProbe for ScriptedProbe {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn probe<'a>(&'a self, spec: &'a CameraSpec, _timeout: Duration) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.per_camera.lock().unwrap().entry(spec.id.clone()).or_insert(0) += 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .get(&spec.id)
                .copied()
                .unwrap_or(ProbeOutcome::Reachable)
        })
    }
}
