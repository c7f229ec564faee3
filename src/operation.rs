//! The closed set of supported media operations.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A single supported transform or inspection, with validated parameters.
///
/// Every variant knows how to describe its own output: file extension,
/// suggested download name, and content type. Parameter validation happens
/// at construction via [`Operation::from_request`], before any workspace is
/// allocated or process spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Extract the audio track as MP3.
    ExtractAudio,
    /// Probe the container and stream layout; produces a metadata record.
    ProbeMetadata,
    /// Re-encode audio as 6-channel AAC.
    RemixSurround,
    /// Scale video to the given dimensions.
    ResizeFrame { width: u32, height: u32 },
    /// Drop all audio tracks, keeping video untouched.
    StripAudio,
}

impl Operation {
    /// Build an operation from untrusted request input.
    ///
    /// Accepts kebab- or snake-case names. Dimensions are taken as signed so
    /// that negative values are rejected explicitly rather than silently
    /// wrapped.
    pub fn from_request(name: &str, width: Option<i64>, height: Option<i64>) -> Result<Self> {
        let op = match name.replace('-', "_").as_str() {
            "extract_audio" => Operation::ExtractAudio,
            "probe_metadata" => Operation::ProbeMetadata,
            "remix_surround" => Operation::RemixSurround,
            "resize_frame" => {
                let width = dimension("width", width)?;
                let height = dimension("height", height)?;
                Operation::ResizeFrame { width, height }
            }
            "strip_audio" => Operation::StripAudio,
            other => {
                return Err(Error::InvalidParameters(format!(
                    "unknown operation: {}",
                    other
                )))
            }
        };
        op.validate()?;
        Ok(op)
    }

    /// Re-check parameter invariants.
    ///
    /// [`Operation::from_request`] already enforces these; this exists so the
    /// dispatcher can validate operations constructed directly (e.g. from the
    /// CLI) without trusting the caller.
    pub fn validate(&self) -> Result<()> {
        if let Operation::ResizeFrame { width, height } = self {
            if *width == 0 || *height == 0 {
                return Err(Error::InvalidParameters(
                    "width and height must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Short name used in logs and default output names.
    pub fn label(&self) -> &'static str {
        match self {
            Operation::ExtractAudio => "extract-audio",
            Operation::ProbeMetadata => "probe-metadata",
            Operation::RemixSurround => "remix-surround",
            Operation::ResizeFrame { .. } => "resize-frame",
            Operation::StripAudio => "strip-audio",
        }
    }

    /// Whether this operation produces an output file (as opposed to a
    /// structured metadata record).
    pub fn produces_file(&self) -> bool {
        !matches!(self, Operation::ProbeMetadata)
    }

    /// Extension of the output artifact, without the leading dot.
    pub fn output_extension(&self) -> Option<&'static str> {
        match self {
            Operation::ExtractAudio => Some("mp3"),
            Operation::ProbeMetadata => None,
            Operation::RemixSurround => Some("m4a"),
            Operation::ResizeFrame { .. } => Some("mp4"),
            Operation::StripAudio => Some("mp4"),
        }
    }

    /// Content type served when the artifact is downloaded.
    pub fn content_type(&self) -> &'static str {
        match self {
            Operation::ExtractAudio => "audio/mpeg",
            Operation::ProbeMetadata => "application/json",
            Operation::RemixSurround => "audio/mp4",
            Operation::ResizeFrame { .. } | Operation::StripAudio => "video/mp4",
        }
    }

    /// Suggested download filename, derived from the uploaded source name.
    pub fn download_name(&self, source_name: &str) -> String {
        let stem = Path::new(source_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");

        match self {
            Operation::ExtractAudio => format!("{}.mp3", stem),
            Operation::ProbeMetadata => format!("{}.json", stem),
            Operation::RemixSurround => format!("{}_surround.m4a", stem),
            Operation::ResizeFrame { .. } => format!("resized_{}.mp4", stem),
            Operation::StripAudio => format!("noaudio_{}.mp4", stem),
        }
    }
}

fn dimension(name: &str, value: Option<i64>) -> Result<u32> {
    let value = value
        .ok_or_else(|| Error::InvalidParameters(format!("missing required parameter: {}", name)))?;
    if value <= 0 {
        return Err(Error::InvalidParameters(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    u32::try_from(value)
        .map_err(|_| Error::InvalidParameters(format!("{} out of range: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_from_request_simple() {
        assert_eq!(
            Operation::from_request("extract-audio", None, None).unwrap(),
            Operation::ExtractAudio
        );
        assert_eq!(
            Operation::from_request("strip_audio", None, None).unwrap(),
            Operation::StripAudio
        );
    }

    #[test]
    fn test_from_request_resize() {
        let op = Operation::from_request("resize-frame", Some(1280), Some(720)).unwrap();
        assert_eq!(
            op,
            Operation::ResizeFrame {
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn test_resize_rejects_missing_dimensions() {
        let err = Operation::from_request("resize-frame", Some(1280), None).unwrap_err();
        assert_matches!(err, Error::InvalidParameters(_));
    }

    #[test]
    fn test_resize_rejects_non_positive_dimensions() {
        assert_matches!(
            Operation::from_request("resize-frame", Some(0), Some(10)),
            Err(Error::InvalidParameters(_))
        );
        assert_matches!(
            Operation::from_request("resize-frame", Some(-5), Some(100)),
            Err(Error::InvalidParameters(_))
        );
    }

    #[test]
    fn test_unknown_operation() {
        assert_matches!(
            Operation::from_request("explode", None, None),
            Err(Error::InvalidParameters(_))
        );
    }

    #[test]
    fn test_download_names() {
        assert_eq!(
            Operation::ExtractAudio.download_name("movie.mp4"),
            "movie.mp3"
        );
        assert_eq!(
            Operation::RemixSurround.download_name("clip.mov"),
            "clip_surround.m4a"
        );
        assert_eq!(
            Operation::StripAudio.download_name("clip.mp4"),
            "noaudio_clip.mp4"
        );
    }

    #[test]
    fn test_produces_file() {
        assert!(Operation::ExtractAudio.produces_file());
        assert!(!Operation::ProbeMetadata.produces_file());
    }
}
