//! DisplayPlan derivation

use crate::camera_registry::{CameraSnapshot, Rect};
use crate::placeholder::{Placeholder, PlaceholderProvider, PlaceholderReason};
use crate::process_supervisor::RelaySettings;
use serde::Serialize;

/// What one grid cell shows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Live { locator: String },
    Placeholder(Placeholder),
}

impl SourceDescriptor {
    pub fn is_live(&self) -> bool {
        matches!(self, SourceDescriptor::Live { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PlanEntry {
    pub camera_id: String,
    pub source: SourceDescriptor,
    pub rect: Rect,
}

/// One entry per enabled camera, declaration order (= z-order)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct DisplayPlan {
    pub entries: Vec<PlanEntry>,
}

impl DisplayPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.source.is_live()).count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.len() - self.live_count()
    }

    /// `name (x,y) wxh [LIVE|PLACEHOLDER]` per entry
    pub fn layout_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| {
                let tag = match &e.source {
                    SourceDescriptor::Live { .. } => "LIVE".to_string(),
                    SourceDescriptor::Placeholder(p) => format!("PLACEHOLDER:{}", p.reason),
                };
                format!("{} {} [{}]", e.camera_id, e.rect, tag)
            })
            .collect()
    }
}

/// Pure snapshot -> plan function
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    placeholders: PlaceholderProvider,
    relay: Option<RelaySettings>,
}

impl PlanBuilder {
    pub fn new(placeholders: PlaceholderProvider) -> Self {
        Self {
            placeholders,
            relay: None,
        }
    }

    /// Live cameras are read from their local relay endpoint
    pub fn with_relay(mut self, relay: Option<RelaySettings>) -> Self {
        self.relay = relay;
        self
    }

    pub fn build(&self, snapshot: &[CameraSnapshot]) -> DisplayPlan {
        let entries = snapshot
            .iter()
            .filter(|c| c.spec.enabled)
            .map(|c| {
                let source = if c.state.is_live() {
                    let locator = match &self.relay {
                        Some(relay) => relay.local_locator(c.slot),
                        None => c.spec.locator.clone(),
                    };
                    SourceDescriptor::Live { locator }
                } else {
                    let reason = PlaceholderReason::for_state(c.state);
                    SourceDescriptor::Placeholder(self.placeholders.describe(&c.spec, reason))
                };
                PlanEntry {
                    camera_id: c.spec.id.clone(),
                    source,
                    rect: c.spec.rect,
                }
            })
            .collect();

        DisplayPlan { entries }
    }

    /// Plan showing every enabled camera as loading
    pub fn loading(&self, snapshot: &[CameraSnapshot]) -> DisplayPlan {
        let entries = snapshot
            .iter()
            .filter(|c| c.spec.enabled)
            .map(|c| PlanEntry {
                camera_id: c.spec.id.clone(),
                source: SourceDescriptor::Placeholder(
                    self.placeholders.describe(&c.spec, PlaceholderReason::Loading),
                ),
                rect: c.spec.rect,
            })
            .collect();
        DisplayPlan { entries }
    }
}
