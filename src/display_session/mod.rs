//! DisplaySession - output environment for the compositor
//!
//! ## Responsibilities
//!
//! - Framebuffer mode: strip `DISPLAY` from the child environment so the
//!   media engine never tries to open an X connection
//! - Window mode: find a usable X display (configured, `$DISPLAY`, `:0`,
//!   `:1`) and the matching `XAUTHORITY`; no display is fatal
//! - Hide the console cursor for the lifetime of a session, restore it once

use crate::config_store::OutputConfig;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Bound on each helper command (`xset q`, `setterm`)
const HELPER_TIMEOUT: Duration = Duration::from_secs(5);

/// Fallback X displays tried in order
const FALLBACK_DISPLAYS: [&str; 2] = [":0", ":1"];

const CURSOR_HIDE: &[u8] = b"\x1b[?25l";
const CURSOR_SHOW: &[u8] = b"\x1b[?25h";

/// Environment adjustments applied to the compositor process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayEnvironment {
    pub env: Vec<(String, String)>,
    pub env_remove: Vec<String>,
}

impl DisplayEnvironment {
    /// Resolve the environment for an output target
    pub async fn resolve(output: &OutputConfig) -> Result<Self> {
        Self::resolve_with(output, "xset").await
    }

    /// Same as [`resolve`](Self::resolve) with an explicit X check program
    /// (invoked as `<program> q`)
    pub async fn resolve_with(output: &OutputConfig, x_check: &str) -> Result<Self> {
        match output {
            OutputConfig::Framebuffer { device, .. } => {
                if !device.exists() {
                    tracing::warn!(device = %device.display(), "Framebuffer device not found");
                }
                Ok(Self {
                    env: Vec::new(),
                    env_remove: vec!["DISPLAY".to_string()],
                })
            }
            OutputConfig::Window { display, .. } => {
                let xauthority = xauthority_path();
                let mut candidates: Vec<String> = Vec::new();
                if let Some(d) = display {
                    candidates.push(d.clone());
                }
                if let Ok(d) = std::env::var("DISPLAY") {
                    if !d.is_empty() && !candidates.contains(&d) {
                        candidates.push(d);
                    }
                }
                for d in FALLBACK_DISPLAYS {
                    if !candidates.iter().any(|c| c == d) {
                        candidates.push(d.to_string());
                    }
                }

                for candidate in &candidates {
                    if x_display_usable(x_check, candidate, xauthority.as_ref()).await {
                        tracing::info!(display = %candidate, "X display selected");
                        let mut env = vec![("DISPLAY".to_string(), candidate.clone())];
                        if let Some(path) = &xauthority {
                            env.push(("XAUTHORITY".to_string(), path.display().to_string()));
                        }
                        return Ok(Self {
                            env,
                            env_remove: Vec::new(),
                        });
                    }
                    tracing::debug!(display = %candidate, "X display not usable");
                }

                Err(Error::DisplaySession(format!(
                    "no usable X display (tried {})",
                    candidates.join(", ")
                )))
            }
        }
    }
}

/// `$XAUTHORITY`, else `$HOME/.Xauthority` if present
fn xauthority_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XAUTHORITY") {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    let home = std::env::var("HOME").ok()?;
    let path = PathBuf::from(home).join(".Xauthority");
    path.exists().then_some(path)
}

async fn x_display_usable(program: &str, display: &str, xauthority: Option<&PathBuf>) -> bool {
    let mut cmd = Command::new(program);
    cmd.arg("q")
        .env("DISPLAY", display)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);
    if let Some(path) = xauthority {
        cmd.env("XAUTHORITY", path);
    }

    match tokio::time::timeout(HELPER_TIMEOUT, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            tracing::debug!(program = %program, error = %e, "X check failed to run");
            false
        }
        Err(_) => false,
    }
}

/// Hidden console cursor; restored once by [`restore`](Self::restore)
#[derive(Debug)]
pub struct CursorGuard {
    hidden: bool,
}

impl CursorGuard {
    /// Hide the cursor (best effort)
    pub async fn hide() -> Self {
        write_escape(CURSOR_HIDE).await;
        run_setterm("off").await;
        tracing::debug!("Console cursor hidden");
        Self { hidden: true }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Restore the cursor; later calls are no-ops
    pub async fn restore(&mut self) {
        if !self.hidden {
            return;
        }
        self.hidden = false;
        write_escape(CURSOR_SHOW).await;
        run_setterm("on").await;
        tracing::debug!("Console cursor restored");
    }
}

async fn write_escape(seq: &[u8]) {
    let mut stdout = tokio::io::stdout();
    if let Err(e) = stdout.write_all(seq).await {
        tracing::debug!(error = %e, "Cursor escape write failed");
        return;
    }
    let _ = stdout.flush().await;
}

async fn run_setterm(state: &str) {
    let mut cmd = Command::new("setterm");
    cmd.args(["-cursor", state])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);
    match tokio::time::timeout(HELPER_TIMEOUT, cmd.status()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "setterm unavailable"),
        Err(_) => tracing::debug!("setterm timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_framebuffer_strips_display() {
        let output = OutputConfig::Framebuffer {
            device: "/dev/null".into(),
            pixel_format: "rgb565le".to_string(),
        };
        let env = DisplayEnvironment::resolve(&output).await.unwrap();
        assert_eq!(env.env_remove, vec!["DISPLAY".to_string()]);
        assert!(env.env.is_empty());
    }

    #[tokio::test]
    async fn test_window_uses_configured_display() {
        let output = OutputConfig::Window {
            title: "grid".to_string(),
            display: Some(":7".to_string()),
        };
        let env = DisplayEnvironment::resolve_with(&output, "true").await.unwrap();
        assert_eq!(env.env[0], ("DISPLAY".to_string(), ":7".to_string()));
        assert!(env.env_remove.is_empty());
    }

    #[tokio::test]
    async fn test_window_without_display_is_fatal() {
        let output = OutputConfig::Window {
            title: "grid".to_string(),
            display: Some(":7".to_string()),
        };
        let err = DisplayEnvironment::resolve_with(&output, "false").await.unwrap_err();
        assert!(matches!(err, Error::DisplaySession(ref m) if m.contains(":7")));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_cursor_restored_once() {
        let mut guard = CursorGuard::hide().await;
        assert!(guard.is_hidden());
        guard.restore().await;
        assert!(!guard.is_hidden());
        guard.restore().await;
        assert!(!guard.is_hidden());
    }
}
