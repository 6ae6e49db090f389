//! DisplayPlan -> media engine invocation
//!
//! Input `i` of the engine is plan entry `i`. The filter graph scales every
//! input to its rectangle (`[i:v] -> [v{i}]`), then overlays them onto a
//! black background in plan order; the last overlay produces `[out]`.

use super::plan::{DisplayPlan, SourceDescriptor};
use crate::config_store::LatencyProfile;
use crate::display_session::DisplayEnvironment;
use crate::placeholder::{PlaceholderKind, PlaceholderLabel};
use crate::process_supervisor::Invocation;
use std::path::PathBuf;
use std::time::Duration;

const FRAME_RATE: u32 = 25;
const LABEL_FONT_SIZE: u32 = 24;
const BACKGROUND_COLOR: &str = "black";

/// Where the composited frames go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    Framebuffer { device: PathBuf, pixel_format: String },
    Window { title: String },
}

/// Invocation settings that do not depend on camera state
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub program: String,
    pub latency: LatencyProfile,
    pub network_timeout: Duration,
    pub sink: OutputSink,
    pub environment: DisplayEnvironment,
}

/// Translate a plan into the compositor invocation
pub fn render(plan: &DisplayPlan, surface: (u32, u32), options: &RenderOptions) -> Invocation {
    let (width, height) = surface;
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    for entry in &plan.entries {
        match &entry.source {
            SourceDescriptor::Live { locator } => {
                live_input_args(&mut args, locator, options);
            }
            SourceDescriptor::Placeholder(placeholder) => match &placeholder.kind {
                PlaceholderKind::Image { path } => {
                    push(&mut args, ["-loop", "1", "-framerate"]);
                    args.push(FRAME_RATE.to_string());
                    args.push("-i".to_string());
                    args.push(path.display().to_string());
                }
                PlaceholderKind::Color { color, width, height } => {
                    push(&mut args, ["-f", "lavfi", "-i"]);
                    args.push(format!("color=c={}:s={}x{}:r={}", color, width, height, FRAME_RATE));
                }
            },
        }
    }

    let pixel_format = match &options.sink {
        OutputSink::Framebuffer { pixel_format, .. } => pixel_format.as_str(),
        OutputSink::Window { .. } => "yuv420p",
    };

    args.push("-filter_complex".to_string());
    args.push(filter_graph(plan, width, height, pixel_format));
    push(&mut args, ["-map", "[out]", "-an"]);

    match &options.sink {
        OutputSink::Framebuffer { device, pixel_format } => {
            push(&mut args, ["-pix_fmt", pixel_format.as_str(), "-f", "fbdev"]);
            args.push(device.display().to_string());
        }
        OutputSink::Window { title } => {
            push(&mut args, ["-pix_fmt", "yuv420p", "-f", "xv", "-window_title", title.as_str()]);
            args.push(title.clone());
        }
    }

    Invocation {
        program: options.program.clone(),
        args,
        env: options.environment.env.clone(),
        env_remove: options.environment.env_remove.clone(),
    }
}

fn live_input_args(args: &mut Vec<String>, locator: &str, options: &RenderOptions) {
    let lower = locator.to_ascii_lowercase();
    if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
        push(args, ["-rtsp_transport", "tcp", "-timeout"]);
        args.push(options.network_timeout.as_micros().to_string());
    }
    match options.latency {
        LatencyProfile::Standard => push(args, ["-thread_queue_size", "512"]),
        LatencyProfile::Low => push(
            args,
            [
                "-fflags",
                "nobuffer",
                "-flags",
                "low_delay",
                "-max_delay",
                "1000000",
                "-thread_queue_size",
                "4",
            ],
        ),
    }
    args.push("-i".to_string());
    args.push(locator.to_string());
}

fn filter_graph(plan: &DisplayPlan, width: u32, height: u32, pixel_format: &str) -> String {
    let mut steps = Vec::with_capacity(plan.len() * 2 + 1);

    for (i, entry) in plan.entries.iter().enumerate() {
        let mut step = format!("[{}:v]scale={}:{}", i, entry.rect.width, entry.rect.height);
        if let SourceDescriptor::Placeholder(p) = &entry.source {
            if let Some(label) = &p.label {
                step.push(',');
                step.push_str(&drawtext(label));
            }
        }
        step.push_str(&format!("[v{}]", i));
        steps.push(step);
    }

    if plan.is_empty() {
        steps.push(format!(
            "color=c={}:s={}x{}:r={},format={}[out]",
            BACKGROUND_COLOR, width, height, FRAME_RATE, pixel_format
        ));
        return steps.join(";");
    }

    steps.push(format!(
        "color=c={}:s={}x{}:r={}[bg]",
        BACKGROUND_COLOR, width, height, FRAME_RATE
    ));

    let last = plan.len() - 1;
    let mut previous = "bg".to_string();
    for (i, entry) in plan.entries.iter().enumerate() {
        let overlay = format!(
            "[{}][v{}]overlay={}:{}:shortest=0",
            previous, i, entry.rect.x, entry.rect.y
        );
        if i == last {
            steps.push(format!("{},format={}[out]", overlay, pixel_format));
        } else {
            let label = format!("bg{}", i);
            steps.push(format!("{}[{}]", overlay, label));
            previous = label;
        }
    }

    steps.join(";")
}

fn drawtext(label: &PlaceholderLabel) -> String {
    format!(
        "drawtext=text='{}':fontsize={}:fontcolor={}:x=(w-text_w)/2:y=(h-text_h)/2",
        escape_text(&label.text),
        LABEL_FONT_SIZE,
        label.color
    )
}

/// Quote-safe drawtext text (inside single quotes)
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\'' => {}
            '\\' | ':' | '%' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn push<const N: usize>(args: &mut Vec<String>, items: [&str; N]) {
    args.extend(items.iter().map(|s| s.to_string()));
}
