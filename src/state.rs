//! Process-level settings

use std::path::PathBuf;

/// Settings taken from the environment (after `.env` is loaded)
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Layout file
    pub config_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: std::env::var("CAMGRID_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/camgrid.json")),
        }
    }
}
