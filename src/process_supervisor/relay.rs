//! Per-camera relay processes
//!
//! In relay mode every live camera gets its own media-engine process that
//! copies the RTSP stream to a local UDP port. The compositor then reads
//! `udp://127.0.0.1:<base_port + slot>` and a camera dropping out only
//! kills its relay, not the whole grid.

use super::process::ManagedProcess;
use super::types::{Invocation, LaunchOptions};
use crate::camera_registry::CameraSpec;
use crate::config_store::RelayConfig;
use crate::error::Result;
use std::time::Duration;

/// MPEG-TS over UDP packet size (7 x 188)
const TS_PACKET_SIZE: u32 = 1316;

/// Socket receive buffer for the compositor side
const UDP_BUFFER_SIZE: u32 = 1_048_576;

/// Resolved relay settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub base_port: u16,
    pub program: String,
    pub network_timeout: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &RelayConfig, network_timeout: Duration) -> Self {
        Self {
            base_port: config.base_port,
            program: config.program.clone(),
            network_timeout,
        }
    }

    pub fn port_for(&self, slot: usize) -> u16 {
        self.base_port.saturating_add(slot as u16)
    }

    /// Locator the compositor uses instead of the camera URL
    pub fn local_locator(&self, slot: usize) -> String {
        format!(
            "udp://127.0.0.1:{}?timeout={}&buffer_size={}",
            self.port_for(slot),
            self.network_timeout.as_micros(),
            UDP_BUFFER_SIZE
        )
    }

    /// Stream-copy invocation for one camera
    pub fn invocation(&self, spec: &CameraSpec, slot: usize) -> Invocation {
        let mut inv = Invocation::new(&self.program).args(["-nostdin", "-loglevel", "error"]);
        if spec.is_rtsp() {
            inv = inv.args([
                "-rtsp_transport".to_string(),
                "tcp".to_string(),
                "-timeout".to_string(),
                self.network_timeout.as_micros().to_string(),
            ]);
        }
        inv.args(["-i", spec.locator.as_str(), "-an", "-c:v", "copy", "-f", "mpegts"])
            .arg(format!(
                "udp://127.0.0.1:{}?pkt_size={}",
                self.port_for(slot),
                TS_PACKET_SIZE
            ))
    }

    /// Launch and confirm one relay
    pub async fn start(
        &self,
        spec: &CameraSpec,
        slot: usize,
        options: &LaunchOptions,
    ) -> Result<ManagedProcess> {
        let invocation = self.invocation(spec, slot);
        let process =
            ManagedProcess::launch(format!("relay:{}", spec.id), &invocation, options).await?;
        tracing::info!(
            camera_id = %spec.id,
            port = self.port_for(slot),
            pid = ?process.pid(),
            "Relay started"
        );
        Ok(process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_registry::Rect;

    fn settings() -> RelaySettings {
        RelaySettings {
            base_port: 10000,
            program: "ffmpeg".to_string(),
            network_timeout: Duration::from_secs(10),
        }
    }

    fn cam(locator: &str) -> CameraSpec {
        CameraSpec {
            id: "gate".to_string(),
            locator: locator.to_string(),
            rect: Rect { x: 0, y: 0, width: 640, height: 360 },
            enabled: true,
        }
    }

    #[test]
    fn test_rtsp_relay_invocation() {
        let inv = settings().invocation(&cam("rtsp://10.0.0.5:554/live"), 2);
        assert_eq!(inv.program, "ffmpeg");
        let joined = inv.args.join(" ");
        assert!(joined.contains("-rtsp_transport tcp -timeout 10000000 -i rtsp://10.0.0.5:554/live"));
        assert!(joined.ends_with("-c:v copy -f mpegts udp://127.0.0.1:10002?pkt_size=1316"));
    }

    #[test]
    fn test_non_rtsp_relay_has_no_transport_flag() {
        let inv = settings().invocation(&cam("http://10.0.0.5/mjpeg"), 0);
        assert!(!inv.args.iter().any(|a| a == "-rtsp_transport"));
    }

    #[test]
    fn test_local_locator_matches_relay_port() {
        let s = settings();
        assert_eq!(
            s.local_locator(3),
            "udp://127.0.0.1:10003?timeout=10000000&buffer_size=1048576"
        );
    }
}
