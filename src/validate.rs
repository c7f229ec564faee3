//! Output artifact validation.
//!
//! Runs after the engine exits cleanly, before a job may report success. A
//! zero exit status is not trusted on its own: the declared artifact must
//! actually exist and contain data.

use crate::engine::probe::{parse_ffprobe_json, MediaInfo};
use crate::error::{Error, Result};
use std::path::Path;

/// Confirm a file artifact exists and is non-empty.
///
/// A present-but-empty file is rejected the same way as a missing one; both
/// mean the engine produced nothing usable.
pub async fn validate_artifact(path: &Path) -> Result<u64> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::EmptyOutput {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(Error::Io(e)),
    };

    if !metadata.is_file() || metadata.len() == 0 {
        return Err(Error::EmptyOutput {
            path: path.to_path_buf(),
        });
    }

    Ok(metadata.len())
}

/// Confirm probe output is a well-formed metadata record.
///
/// For metadata jobs the record itself is the artifact; no file-size check
/// applies.
pub fn validate_metadata(raw_json: &str) -> Result<MediaInfo> {
    parse_ffprobe_json(raw_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_artifact_rejected() {
        let dir = TempDir::new().unwrap();
        let err = validate_artifact(&dir.path().join("output.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn test_empty_artifact_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.mp3");
        std::fs::write(&path, b"").unwrap();

        let err = validate_artifact(&path).await.unwrap_err();
        assert!(matches!(err, Error::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn test_non_empty_artifact_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.mp3");
        std::fs::write(&path, b"audio bytes").unwrap();

        assert_eq!(validate_artifact(&path).await.unwrap(), 11);
    }

    #[test]
    fn test_metadata_must_be_well_formed() {
        assert!(validate_metadata("{}").is_err());
        assert!(validate_metadata(r#"{"format":{"format_name":"wav"}}"#).is_ok());
    }
}
