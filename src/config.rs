use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment overrides look like `LOQA_RECORDINGS__STORE__PATH`.
const ENV_PREFIX: &str = "LOQA_RECORDINGS";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub capture: CaptureSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file holding sessions and chunks
    pub path: PathBuf,
    /// Completed sessions older than this are removed by `cleanup`
    pub cleanup_max_age_hours: u64,
}

#[derive(Debug, Deserialize)]
pub struct CaptureSettings {
    /// Unsaved chunks kept for retry while storage is failing
    pub max_pending_chunks: usize,
}

impl Config {
    /// Load from `path` (extension optional), falling back to defaults for
    /// anything the file or environment leaves out. A missing file is fine.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "loqa-recordings")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 3040)?
            .set_default("store.path", "data/recordings.db")?
            .set_default("store.cleanup_max_age_hours", 24)?
            .set_default("capture.max_pending_chunks", 32)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load config from {path}"))?;

        Ok(settings.try_deserialize()?)
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.store.cleanup_max_age_hours.saturating_mul(60 * 60))
    }
}
