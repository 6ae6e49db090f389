//! Compositor - layout plan and media engine invocation
//!
//! ## Responsibilities
//!
//! - `PlanBuilder::build`: registry snapshot -> [`DisplayPlan`] (live feed
//!   or placeholder per enabled camera, declaration order)
//! - `render`: plan -> [`Invocation`](crate::process_supervisor::Invocation)
//!   with inputs, scale/overlay graph and output sink
//!
//! Both steps are pure. Equal snapshots give byte-identical invocations,
//! which is what lets the recovery loop skip no-op restarts.

mod plan;
mod render;

pub use plan::{DisplayPlan, PlanBuilder, PlanEntry, SourceDescriptor};
pub use render::{render, OutputSink, RenderOptions};

use crate::config_store::OutputConfig;

impl From<&OutputConfig> for OutputSink {
    fn from(output: &OutputConfig) -> Self {
        match output {
            OutputConfig::Framebuffer { device, pixel_format } => OutputSink::Framebuffer {
                device: device.clone(),
                pixel_format: pixel_format.clone(),
            },
            OutputConfig::Window { title, .. } => OutputSink::Window {
                title: title.clone(),
            },
        }
    }
}
