//! Error handling for camgrid
//!
//! Probe failures are not errors: they are reported as
//! [`ProbeOutcome`](crate::stream_prober::ProbeOutcome) values and turned
//! into state transitions. Only the variants for which [`Error::is_fatal`]
//! returns true are allowed to leave the recovery loop.

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or inconsistent configuration (fatal at startup)
    #[error("Config error: {0}")]
    Config(String),

    /// State machine edge that does not exist
    #[error("Illegal transition for camera {camera_id}: {from} -> {to}")]
    IllegalTransition {
        camera_id: String,
        from: String,
        to: String,
    },

    /// Camera identifier not present in the registry
    #[error("Unknown camera: {0}")]
    UnknownCamera(String),

    /// External process could not be started or exited during its grace period
    #[error("Launch error ({program}): {message}")]
    Launch {
        program: String,
        message: String,
        diagnostics: Vec<String>,
    },

    /// A supervised process exited on its own
    #[error("Process died ({label}): {status}")]
    ProcessDied { label: String, status: String },

    /// Compositor kept failing; the supervisor gives up
    #[error("Max restart attempts reached ({attempts})")]
    MaxRetriesExceeded { attempts: u32 },

    /// No usable display session for windowed output
    #[error("Display session error: {0}")]
    DisplaySession(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Fatal errors stop the supervisor; everything else is handled locally
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::MaxRetriesExceeded { .. } | Error::DisplaySession(_)
        )
    }

    /// Short machine-readable code used in log fields
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Error::UnknownCamera(_) => "UNKNOWN_CAMERA",
            Error::Launch { .. } => "LAUNCH_ERROR",
            Error::ProcessDied { .. } => "PROCESS_DIED",
            Error::MaxRetriesExceeded { .. } => "MAX_RETRIES_EXCEEDED",
            Error::DisplaySession(_) => "DISPLAY_SESSION_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}
