//! ConfigStore types
//!
//! Layout file schema. Every struct rejects unknown fields so a typo in the
//! JSON fails at load time instead of being silently ignored.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level layout file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub display: DisplayConfig,
    pub cameras: Vec<CameraConfig>,
}

/// One camera record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    pub name: String,
    pub url: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Older layout files carry a window slot number; accepted and ignored
    #[serde(default)]
    pub window_id: Option<u32>,
}

/// How camera reachability is tested
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    /// Decode one frame through the media engine
    #[default]
    Ffmpeg,
    /// RTSP OPTIONS handshake over TCP
    RtspOptions,
}

/// Input buffering profile for live sources
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LatencyProfile {
    #[default]
    Standard,
    Low,
}

/// Restart backoff shape
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

/// Restart backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct BackoffConfig {
    pub kind: BackoffKind,
    pub base_ms: u64,
    pub max_ms: u64,
    /// A session healthy for this long clears the failure counter
    pub stable_after_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_ms: 1000,
            max_ms: 30_000,
            stable_after_secs: 300,
        }
    }
}

/// Compositor output target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum OutputConfig {
    /// Raw Linux framebuffer device
    Framebuffer {
        #[serde(default = "default_fb_device")]
        device: PathBuf,
        #[serde(default = "default_fb_pix_fmt")]
        pixel_format: String,
    },
    /// On-screen X11 window
    Window {
        #[serde(default = "default_window_title")]
        title: String,
        /// X display name; falls back to $DISPLAY, then :0 / :1
        #[serde(default)]
        display: Option<String>,
    },
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig::Framebuffer {
            device: default_fb_device(),
            pixel_format: default_fb_pix_fmt(),
        }
    }
}

/// Per-camera relay processes (RTSP -> local UDP)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default = "default_relay_port")]
    pub base_port: u16,
    #[serde(default = "default_ffmpeg")]
    pub program: String,
}

/// Display and supervision parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct DisplayConfig {
    pub screen_width: u32,
    pub screen_height: u32,
    pub grid_cols: u32,
    pub grid_rows: u32,
    /// Network timeout for live inputs (seconds)
    pub network_timeout: u64,
    /// Consecutive compositor failures tolerated before giving up
    pub restart_retries: u32,
    /// Minimum seconds between probes of a failed camera
    pub camera_retry_interval: u64,
    pub enable_camera_retry: bool,
    pub show_placeholders: bool,
    pub placeholder_image: Option<PathBuf>,
    pub placeholder_bg_color: String,
    pub placeholder_text_color: String,
    pub placeholder_labels: bool,
    pub probe_method: ProbeMethod,
    /// Per-camera probe bound (seconds)
    pub probe_timeout: u64,
    pub probe_concurrency: usize,
    /// Recovery loop period (seconds)
    pub monitor_interval: u64,
    pub launch_grace_ms: u64,
    /// Graceful stop bound before SIGKILL (seconds)
    pub stop_timeout: u64,
    pub backoff: BackoffConfig,
    pub latency_profile: LatencyProfile,
    pub output: OutputConfig,
    pub hide_cursor: bool,
    pub compositor_program: String,
    pub niceness: Option<i32>,
    pub relay: Option<RelayConfig>,
    pub status_log_interval_secs: u64,
    pub show_loading_placeholders: bool,
    /// Informational; RUST_LOG takes precedence
    pub log_level: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            grid_cols: 2,
            grid_rows: 2,
            network_timeout: 30,
            restart_retries: 3,
            camera_retry_interval: 30,
            enable_camera_retry: true,
            show_placeholders: true,
            placeholder_image: None,
            placeholder_bg_color: "darkgray".to_string(),
            placeholder_text_color: "white".to_string(),
            placeholder_labels: true,
            probe_method: ProbeMethod::Ffmpeg,
            probe_timeout: 10,
            probe_concurrency: 5,
            monitor_interval: 10,
            launch_grace_ms: 3000,
            stop_timeout: 10,
            backoff: BackoffConfig::default(),
            latency_profile: LatencyProfile::Standard,
            output: OutputConfig::default(),
            hide_cursor: true,
            compositor_program: default_ffmpeg(),
            niceness: None,
            relay: None,
            status_log_interval_secs: 60,
            show_loading_placeholders: false,
            log_level: "INFO".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_fb_device() -> PathBuf {
    PathBuf::from("/dev/fb0")
}

fn default_fb_pix_fmt() -> String {
    "rgb565le".to_string()
}

fn default_window_title() -> String {
    "camgrid".to_string()
}

fn default_relay_port() -> u16 {
    10000
}
