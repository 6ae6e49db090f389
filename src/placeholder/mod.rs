//! Placeholder - stand-in sources for cameras that are not live
//!
//! A configured image is used when it exists; otherwise a solid colour of
//! the camera's rectangle size. The image path is resolved once at
//! construction, so plans stay deterministic even if the file disappears
//! later.

use crate::camera_registry::{CameraSpec, CameraState, FailureCause};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Why a placeholder is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderReason {
    Offline,
    Timeout,
    /// Not yet probed
    Loading,
}

impl PlaceholderReason {
    /// Reason for a non-live state
    pub fn for_state(state: CameraState) -> Self {
        match state {
            CameraState::Failed(FailureCause::Timeout) => PlaceholderReason::Timeout,
            CameraState::Failed(_) => PlaceholderReason::Offline,
            CameraState::Untested | CameraState::Probing | CameraState::Live => {
                PlaceholderReason::Loading
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceholderReason::Offline => "offline",
            PlaceholderReason::Timeout => "timeout",
            PlaceholderReason::Loading => "loading",
        }
    }
}

impl fmt::Display for PlaceholderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placeholder media
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaceholderKind {
    Image { path: PathBuf },
    Color { color: String, width: u32, height: u32 },
}

/// Text drawn over a placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PlaceholderLabel {
    pub text: String,
    pub color: String,
}

/// Source descriptor for one non-live camera
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Placeholder {
    pub kind: PlaceholderKind,
    pub reason: PlaceholderReason,
    pub label: Option<PlaceholderLabel>,
}

/// PlaceholderProvider instance
#[derive(Debug, Clone)]
pub struct PlaceholderProvider {
    image: Option<PathBuf>,
    background: String,
    text_color: String,
    labels: bool,
}

impl PlaceholderProvider {
    pub fn new(image: Option<&Path>, background: &str, text_color: &str, labels: bool) -> Self {
        let image = image.and_then(|p| {
            if p.is_file() {
                Some(p.to_path_buf())
            } else {
                tracing::warn!(path = %p.display(), "Placeholder image not found, using solid colour");
                None
            }
        });

        Self {
            image,
            background: background.to_string(),
            text_color: text_color.to_string(),
            labels,
        }
    }

    pub fn uses_image(&self) -> bool {
        self.image.is_some()
    }

    /// Placeholder for `camera` shown because of `reason`
    pub fn describe(&self, camera: &CameraSpec, reason: PlaceholderReason) -> Placeholder {
        let kind = match &self.image {
            Some(path) => PlaceholderKind::Image { path: path.clone() },
            None => PlaceholderKind::Color {
                color: self.background.clone(),
                width: camera.rect.width,
                height: camera.rect.height,
            },
        };

        let label = self.labels.then(|| PlaceholderLabel {
            text: format!("{} ({})", camera.id, reason),
            color: self.text_color.clone(),
        });

        Placeholder { kind, reason, label }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::camera;

    #[test]
    fn test_missing_image_falls_back_to_colour() {
        let provider = PlaceholderProvider::new(
            Some(Path::new("/nonexistent/offline.png")),
            "darkgray",
            "white",
            false,
        );
        assert!(!provider.uses_image());

        let p = provider.describe(&camera("cam2", 1), PlaceholderReason::Offline);
        assert_eq!(
            p.kind,
            PlaceholderKind::Color { color: "darkgray".to_string(), width: 960, height: 540 }
        );
        assert!(p.label.is_none());
    }

    #[test]
    fn test_existing_image_is_used() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let provider = PlaceholderProvider::new(Some(file.path()), "black", "white", true);
        let p = provider.describe(&camera("cam1", 0), PlaceholderReason::Timeout);

        assert_eq!(p.kind, PlaceholderKind::Image { path: file.path().to_path_buf() });
        let label = p.label.unwrap();
        assert_eq!(label.text, "cam1 (timeout)");
        assert_eq!(label.color, "white");
    }

    #[test]
    fn test_reason_for_state() {
        assert_eq!(
            PlaceholderReason::for_state(CameraState::Failed(FailureCause::Timeout)),
            PlaceholderReason::Timeout
        );
        assert_eq!(
            PlaceholderReason::for_state(CameraState::Failed(FailureCause::ProcessDied)),
            PlaceholderReason::Offline
        );
        assert_eq!(PlaceholderReason::for_state(CameraState::Untested), PlaceholderReason::Loading);
    }

    #[test]
    fn test_same_inputs_same_placeholder() {
        let provider = PlaceholderProvider::new(None, "navy", "yellow", true);
        let a = provider.describe(&camera("cam3", 2), PlaceholderReason::Offline);
        let b = provider.describe(&camera("cam3", 2), PlaceholderReason::Offline);
        assert_eq!(a, b);
    }
}
