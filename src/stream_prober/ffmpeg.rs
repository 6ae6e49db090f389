use super::{ProbeOutcome, StreamProbe};
use crate::camera_registry::CameraSpec;
use futures::future::BoxFuture;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Decode a single frame through the media engine
///
/// Exit 0 with a frame is `Reachable`. The engine exits 0 with
/// "Output file is empty" when the input opened but produced nothing,
/// which counts as `Unreachable`.
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    program: String,
}

impl FfmpegProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, spec: &CameraSpec, timeout: Duration) -> ProbeOutcome {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-nostdin", "-y", "-loglevel", "error"]);
        if spec.is_rtsp() {
            cmd.args(["-rtsp_transport", "tcp", "-timeout"])
                .arg(timeout.as_micros().to_string());
        }
        cmd.args(["-i", spec.locator.as_str(), "-frames:v", "1", "-f", "null", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(camera_id = %spec.id, program = %self.program, error = %e, "Probe spawn failed");
                return ProbeOutcome::Unreachable;
            }
        };

        // Dropping the future on timeout kills the child
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => ProbeOutcome::TimedOut,
            Ok(Err(e)) => {
                tracing::warn!(camera_id = %spec.id, error = %e, "Probe wait failed");
                ProbeOutcome::Unreachable
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if output.status.success() && !stderr.contains("Output file is empty") {
                    ProbeOutcome::Reachable
                } else {
                    tracing::debug!(
                        camera_id = %spec.id,
                        status = %output.status,
                        stderr = %stderr.lines().last().unwrap_or(""),
                        "Probe found no data"
                    );
                    ProbeOutcome::Unreachable
                }
            }
        }
    }
}

impl StreamProbe for FfmpegProbe {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn probe<'a>(&'a self, spec: &'a CameraSpec, timeout: Duration) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(self.run(spec, timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{camera, script};

    #[tokio::test]
    async fn test_exit_zero_is_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "engine", "exit 0");
        let probe = FfmpegProbe::new(program.display().to_string());
        let outcome = probe.probe(&camera("cam1", 0), Duration::from_secs(5)).await;
        assert_eq!(outcome, ProbeOutcome::Reachable);
    }

    #[tokio::test]
    async fn test_empty_output_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "engine", "echo 'Output file is empty, nothing was encoded' >&2; exit 0");
        let probe = FfmpegProbe::new(program.display().to_string());
        let outcome = probe.probe(&camera("cam1", 0), Duration::from_secs(5)).await;
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "engine", "echo 'Connection refused' >&2; exit 1");
        let probe = FfmpegProbe::new(program.display().to_string());
        let outcome = probe.probe(&camera("cam1", 0), Duration::from_secs(5)).await;
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }

    #[tokio::test]
    async fn test_hanging_engine_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "engine", "exec sleep 30");
        let probe = FfmpegProbe::new(program.display().to_string());
        let outcome = probe.probe(&camera("cam1", 0), Duration::from_millis(300)).await;
        assert_eq!(outcome, ProbeOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_rtsp_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args");
        let program = script(
            dir.path(),
            "engine",
            &format!("echo \"$@\" > {}; exit 0", args_file.display()),
        );
        let probe = FfmpegProbe::new(program.display().to_string());
        probe.probe(&camera("cam1", 0), Duration::from_secs(8)).await;

        let args = std::fs::read_to_string(args_file).unwrap();
        assert!(args.contains("-rtsp_transport tcp -timeout 8000000 -i rtsp://192.168.1.10/cam1"));
        assert!(args.trim_end().ends_with("-frames:v 1 -f null -"));
    }
}
