use super::{FfmpegProbe, ProbeOutcome, StreamProbe};
use crate::camera_registry::CameraSpec;
use base64::Engine;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const DEFAULT_RTSP_PORT: u16 = 554;

/// RTSP OPTIONS handshake
///
/// Cheaper than decoding a frame: only a `RTSP/1.0 200` status line counts
/// as reachable. Credentials embedded in the locator are sent as Basic
/// auth. Non-RTSP locators are delegated to the frame probe.
#[derive(Debug, Clone)]
pub struct RtspOptionsProbe {
    fallback: FfmpegProbe,
}

/// Parts of an RTSP locator needed for the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
struct RtspTarget {
    host: String,
    port: u16,
    /// Locator with credentials removed
    request_uri: String,
    credentials: Option<(String, String)>,
}

impl RtspOptionsProbe {
    pub fn new(fallback: FfmpegProbe) -> Self {
        Self { fallback }
    }

    async fn handshake(target: &RtspTarget) -> std::io::Result<bool> {
        let mut stream = TcpStream::connect((target.host.as_str(), target.port)).await?;

        let mut request = format!(
            "OPTIONS {} RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: camgrid/{}\r\n",
            target.request_uri,
            env!("CARGO_PKG_VERSION")
        );
        if let Some((user, pass)) = &target.credentials {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
            request.push_str(&format!("Authorization: Basic {}\r\n", token));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;

        // Read until the status line is complete
        let mut buf = Vec::with_capacity(256);
        let mut chunk = [0u8; 512];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.windows(2).any(|w| w == b"\r\n") || buf.len() >= 1024 {
                break;
            }
        }

        let response = String::from_utf8_lossy(&buf);
        let status_line = response.lines().next().unwrap_or("");
        Ok(status_line.starts_with("RTSP/1.0 200"))
    }

    async fn run(&self, spec: &CameraSpec, timeout: Duration) -> ProbeOutcome {
        let target = match parse_rtsp_locator(&spec.locator) {
            Some(t) => t,
            None => return self.fallback.probe(spec, timeout).await,
        };

        match tokio::time::timeout(timeout, Self::handshake(&target)).await {
            Err(_) => ProbeOutcome::TimedOut,
            Ok(Ok(true)) => ProbeOutcome::Reachable,
            Ok(Ok(false)) => {
                tracing::debug!(camera_id = %spec.id, "RTSP OPTIONS not accepted");
                ProbeOutcome::Unreachable
            }
            Ok(Err(e)) => {
                tracing::debug!(camera_id = %spec.id, error = %e, "RTSP OPTIONS failed");
                ProbeOutcome::Unreachable
            }
        }
    }
}

impl StreamProbe for RtspOptionsProbe {
    fn name(&self) -> &'static str {
        "rtsp_options"
    }

    fn probe<'a>(&'a self, spec: &'a CameraSpec, timeout: Duration) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(self.run(spec, timeout))
    }
}

/// Split `rtsp://[user:pass@]host[:port]/path`
fn parse_rtsp_locator(locator: &str) -> Option<RtspTarget> {
    let (scheme, rest) = locator.split_once("://")?;
    if !scheme.eq_ignore_ascii_case("rtsp") {
        return None;
    }

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };

    let (credentials, hostport) = match authority.rsplit_once('@') {
        Some((userinfo, hostport)) => {
            let (user, pass) = userinfo.split_once(':').unwrap_or((userinfo, ""));
            (Some((user.to_string(), pass.to_string())), hostport)
        }
        None => (None, authority),
    };

    let (host, port) = if let Some(stripped) = hostport.strip_prefix('[') {
        // [v6]:port
        let (host, tail) = stripped.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None => DEFAULT_RTSP_PORT,
        };
        (host.to_string(), port)
    } else {
        match hostport.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().ok()?),
            None => (hostport.to_string(), DEFAULT_RTSP_PORT),
        }
    };

    if host.is_empty() {
        return None;
    }

    Some(RtspTarget {
        request_uri: format!("{}://{}{}", scheme, hostport, path),
        host,
        port,
        credentials,
    })
}
