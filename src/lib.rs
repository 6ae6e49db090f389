//! camgrid Library
//!
//! Camera grid supervisor: keeps a tiled wall of RTSP cameras on screen
//! through one external compositor process.
//!
//! ## Architecture (7 Components)
//!
//! 1. ConfigStore - Layout file schema and loading
//! 2. CameraRegistry - Camera specs + connectivity state machine (SSoT)
//! 3. StreamProber - Bounded, parallel reachability probes
//! 4. Placeholder - Stand-in sources for cameras that are not live
//! 5. Compositor - Snapshot -> DisplayPlan -> media engine invocation
//! 6. ProcessSupervisor - Compositor/relay process lifecycle and backoff
//! 7. RecoveryLoop - Periodic recovery, coalesced recomposition, shutdown
//!
//! DisplaySession supplies the output environment (framebuffer or X11).
//!
//! ## Design Principles
//!
//! - SSoT: CameraRegistry is the only place camera state lives
//! - One compositor: a new session starts only after the old one is gone
//! - Pure derivation: equal snapshots give identical invocations

pub mod camera_registry;
pub mod compositor;
pub mod config_store;
pub mod display_session;
pub mod placeholder;
pub mod process_supervisor;
pub mod recovery_loop;
pub mod stream_prober;
pub mod error;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
pub use state::AppConfig;
