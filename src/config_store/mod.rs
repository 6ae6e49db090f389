//! ConfigStore - Layout file loading
//!
//! ## Responsibilities
//!
//! - Read the JSON layout file (display parameters + ordered camera list)
//! - Reject unknown / missing fields with `Error::Config`
//! - Convert camera records into registry specs (declaration order kept)
//!
//! Semantic checks (unique names, rectangles inside the surface) belong to
//! [`CameraRegistry::load`](crate::camera_registry::CameraRegistry::load).

mod types;

pub use types::*;

use crate::camera_registry::{CameraSpec, Rect};
use crate::error::{Error, Result};
use std::path::Path;

/// Load and parse a layout file
pub async fn load_config(path: &Path) -> Result<SupervisorConfig> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Config(format!("cannot read {}: {}", path.display(), e))
    })?;

    let config = parse_config(&raw)?;

    tracing::info!(
        path = %path.display(),
        cameras = config.cameras.len(),
        enabled = config.cameras.iter().filter(|c| c.enabled).count(),
        "Configuration loaded"
    );

    Ok(config)
}

/// Parse a layout document
pub fn parse_config(raw: &str) -> Result<SupervisorConfig> {
    let config: SupervisorConfig =
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid layout: {}", e)))?;

    check_display(&config.display, config.cameras.len())?;

    let enabled = config.cameras.iter().filter(|c| c.enabled).count() as u32;
    let cells = config.display.grid_cols.saturating_mul(config.display.grid_rows);
    if enabled > cells {
        tracing::warn!(
            enabled = enabled,
            grid_cols = config.display.grid_cols,
            grid_rows = config.display.grid_rows,
            "More enabled cameras than grid cells"
        );
    }

    Ok(config)
}

fn check_display(display: &DisplayConfig, cameras: usize) -> Result<()> {
    if display.screen_width == 0 || display.screen_height == 0 {
        return Err(Error::Config("screen size must be non-zero".to_string()));
    }
    if display.probe_concurrency == 0 {
        return Err(Error::Config("probe_concurrency must be at least 1".to_string()));
    }
    if display.probe_timeout == 0 {
        return Err(Error::Config("probe_timeout must be at least 1 second".to_string()));
    }
    if display.monitor_interval == 0 {
        return Err(Error::Config("monitor_interval must be at least 1 second".to_string()));
    }
    if let Some(relay) = &display.relay {
        // One UDP port per declared camera, starting at base_port
        let last = relay.base_port as usize + cameras.saturating_sub(1);
        if last > u16::MAX as usize {
            return Err(Error::Config(format!(
                "relay base_port {} leaves no room for {} cameras",
                relay.base_port, cameras
            )));
        }
    }
    Ok(())
}

impl CameraConfig {
    /// Registry spec for this record
    pub fn to_spec(&self) -> CameraSpec {
        CameraSpec {
            id: self.name.clone(),
            locator: self.url.clone(),
            rect: Rect {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
            },
            enabled: self.enabled,
        }
    }
}

impl SupervisorConfig {
    /// Specs in declaration order (disabled cameras included)
    pub fn camera_specs(&self) -> Vec<CameraSpec> {
        self.cameras.iter().map(CameraConfig::to_spec).collect()
    }

    /// Output surface size
    pub fn surface(&self) -> (u32, u32) {
        (self.display.screen_width, self.display.screen_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"{
        "display": {
            "screen_width": 1280,
            "screen_height": 720,
            "camera_retry_interval": 15,
            "output": { "kind": "framebuffer", "device": "/dev/fb1" }
        },
        "cameras": [
            { "name": "front", "url": "rtsp://10.0.0.2/stream1", "window_id": 0,
              "x": 0, "y": 0, "width": 640, "height": 360 },
            { "name": "yard", "url": "rtsp://10.0.0.3/stream1",
              "x": 640, "y": 0, "width": 640, "height": 360, "enabled": false }
        ]
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = parse_config(LAYOUT).unwrap();

        assert_eq!(config.surface(), (1280, 720));
        assert_eq!(config.display.camera_retry_interval, 15);
        assert_eq!(config.display.restart_retries, 3);
        assert_eq!(config.display.probe_method, ProbeMethod::Ffmpeg);
        assert_eq!(
            config.display.output,
            OutputConfig::Framebuffer {
                device: "/dev/fb1".into(),
                pixel_format: "rgb565le".to_string(),
            }
        );

        let specs = config.camera_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].id, "front");
        assert!(specs[0].enabled);
        assert!(!specs[1].enabled);
        assert_eq!(specs[1].rect.x, 640);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let raw = r#"{
            "display": { "screen_width": 800, "rotation_speed": 3 },
            "cameras": []
        }"#;
        let err = parse_config(raw).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("rotation_speed"));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let raw = r#"{
            "cameras": [ { "name": "a", "url": "rtsp://x", "x": 0, "y": 0, "width": 10 } ]
        }"#;
        let err = parse_config(raw).unwrap_err();
        assert!(err.to_string().contains("height"));
    }

    #[test]
    fn test_window_output_and_relay() {
        let raw = r#"{
            "display": {
                "output": { "kind": "window", "title": "grid" },
                "relay": { "base_port": 20000 },
                "probe_method": "rtsp_options",
                "latency_profile": "low"
            },
            "cameras": []
        }"#;
        let config = parse_config(raw).unwrap();
        assert_eq!(
            config.display.output,
            OutputConfig::Window { title: "grid".to_string(), display: None }
        );
        let relay = config.display.relay.unwrap();
        assert_eq!(relay.base_port, 20000);
        assert_eq!(relay.program, "ffmpeg");
        assert_eq!(config.display.probe_method, ProbeMethod::RtspOptions);
        assert_eq!(config.display.latency_profile, LatencyProfile::Low);
    }

    #[test]
    fn test_relay_port_range_must_fit_cameras() {
        let layout = |base_port: u32| {
            format!(
                r#"{{
                "display": {{ "relay": {{ "base_port": {} }} }},
                "cameras": [
                    {{ "name": "a", "url": "rtsp://10.0.0.2/s", "x": 0, "y": 0, "width": 320, "height": 240 }},
                    {{ "name": "b", "url": "rtsp://10.0.0.3/s", "x": 320, "y": 0, "width": 320, "height": 240 }},
                    {{ "name": "c", "url": "rtsp://10.0.0.4/s", "x": 0, "y": 240, "width": 320, "height": 240 }}
                ]
            }}"#,
                base_port
            )
        };

        assert!(parse_config(&layout(65533)).is_ok());
        let err = parse_config(&layout(65534)).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("base_port 65534")));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let raw = r#"{ "display": { "probe_concurrency": 0 }, "cameras": [] }"#;
        assert!(matches!(parse_config(raw), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/camgrid.json")).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
