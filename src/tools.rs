//! External tool detection.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Check if a tool is available and get its information.
pub fn check_tool(name: &str, version_arg: &str) -> ToolInfo {
    let result = Command::new(name).arg(version_arg).output();

    match result {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string());

            let path = which::which(name).ok();

            ToolInfo {
                name: name.to_string(),
                available: true,
                version,
                path,
            }
        }
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Check the engine tools the pipeline invokes.
pub fn check_tools(config: &EngineConfig) -> Vec<ToolInfo> {
    vec![
        check_tool(&config.ffmpeg_path.to_string_lossy(), "-version"),
        check_tool(&config.ffprobe_path.to_string_lossy(), "-version"),
    ]
}

/// Require that a tool is available, returning its path.
///
/// A configured absolute path is trusted if it exists; bare names resolve
/// through PATH.
pub fn require_tool(configured: &Path) -> Result<PathBuf> {
    if configured.is_absolute() {
        if configured.exists() {
            return Ok(configured.to_path_buf());
        }
        return Err(Error::tool_not_found(
            configured.to_string_lossy().into_owned(),
        ));
    }

    which::which(configured)
        .map_err(|_| Error::tool_not_found(configured.to_string_lossy().into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_tool_not_found() {
        let info = check_tool("nonexistent_tool_12345", "--version");
        assert!(!info.available);
        assert!(info.version.is_none());
        assert!(info.path.is_none());
    }

    #[test]
    fn test_require_missing_absolute_path() {
        let err = require_tool(Path::new("/nonexistent/bin/ffmpeg")).unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { .. }));
    }
}
