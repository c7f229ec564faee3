use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub scratch: ScratchConfig,
    pub engine: EngineConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on an uploaded request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8350,
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// Scratch area settings.
///
/// The scratch root is an explicit dependency injected into the workspace
/// manager, never an ambient module constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Directory under which per-job namespaces are created.
    pub root: PathBuf,
    /// How long terminal job records (and any unfetched artifacts) are kept
    /// before the janitor reaps them.
    pub retention_secs: u64,
    /// How often the janitor runs.
    pub janitor_interval_secs: u64,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("mediaforge"),
            retention_secs: 300,
            janitor_interval_secs: 30,
        }
    }
}

/// External engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// FFmpeg binary; a bare name resolves through PATH.
    pub ffmpeg_path: PathBuf,
    /// FFprobe binary; a bare name resolves through PATH.
    pub ffprobe_path: PathBuf,
    /// Maximum bytes of engine stderr retained for failure diagnostics.
    pub diagnostic_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            diagnostic_limit: 8 * 1024,
        }
    }
}
