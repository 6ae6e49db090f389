//! CameraRegistry types

use crate::process_supervisor::ManagedProcess;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Target rectangle on the output surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// True if the rectangle is non-empty and fits inside `surface`
    pub fn fits_within(&self, surface: (u32, u32)) -> bool {
        let (sw, sh) = surface;
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).map_or(false, |r| r <= sw)
            && self.y.checked_add(self.height).map_or(false, |b| b <= sh)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}) {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Immutable camera definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraSpec {
    /// Unique name
    pub id: String,
    /// Source URI (rtsp://, http://, udp://, file path)
    pub locator: String,
    pub rect: Rect,
    pub enabled: bool,
}

impl CameraSpec {
    /// RTSP source (gets transport and timeout input options)
    pub fn is_rtsp(&self) -> bool {
        let lower = self.locator.to_ascii_lowercase();
        lower.starts_with("rtsp://") || lower.starts_with("rtsps://")
    }
}

/// Why a camera is in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Probe did not finish within its bound
    Timeout,
    /// Probe finished without observing data
    Unreachable,
    /// An owned relay process exited
    ProcessDied,
}

/// Connectivity state
///
/// ```text
/// Untested -> Probing -> Live | Failed
/// Live -> Failed
/// Failed -> Probing   (recovery loop, after the retry interval)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    Untested,
    Probing,
    Live,
    Failed(FailureCause),
}

impl CameraState {
    /// Edge check for the state machine
    pub fn can_transition_to(&self, next: &CameraState) -> bool {
        use CameraState::*;
        matches!(
            (self, next),
            (Untested, Probing)
                | (Probing, Live)
                | (Probing, Failed(_))
                | (Live, Failed(_))
                | (Failed(_), Probing)
        )
    }

    pub fn is_live(&self) -> bool {
        matches!(self, CameraState::Live)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CameraState::Failed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraState::Untested => "untested",
            CameraState::Probing => "probing",
            CameraState::Live => "live",
            CameraState::Failed(FailureCause::Timeout) => "failed(timeout)",
            CameraState::Failed(FailureCause::Unreachable) => "failed(unreachable)",
            CameraState::Failed(FailureCause::ProcessDied) => "failed(process_died)",
        }
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-camera runtime, owned by the registry
pub struct CameraRuntime {
    pub state: CameraState,
    /// Completion time of the last probe (or last entry into Live/Failed)
    pub last_probe: Option<Instant>,
    pub consecutive_failures: u32,
    /// Relay process owned on behalf of this camera (relay mode only)
    pub relay: Option<ManagedProcess>,
}

impl Default for CameraRuntime {
    fn default() -> Self {
        Self {
            state: CameraState::Untested,
            last_probe: None,
            consecutive_failures: 0,
            relay: None,
        }
    }
}

/// One row of a registry snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CameraSnapshot {
    /// Declaration index (stable across snapshots)
    pub slot: usize,
    pub spec: CameraSpec,
    pub state: CameraState,
}

/// Aggregate counts for status logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub untested: usize,
    pub probing: usize,
    pub live: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.untested + self.probing + self.live + self.failed
    }
}
