//! FFprobe-based media probing.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Summary of a media file's container and streams.
///
/// This is the artifact a ProbeMetadata job produces, and what the pipeline
/// consults for the input duration used to scale progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container format name as reported by the engine (e.g. `mov,mp4,m4a`).
    pub container: String,
    /// Total duration in seconds, when the container declares one.
    pub duration_seconds: Option<f64>,
    /// File size in bytes.
    pub size_bytes: Option<u64>,
    /// Overall bit rate in bits per second.
    pub bit_rate: Option<u64>,
    pub video_tracks: Vec<VideoTrack>,
    pub audio_tracks: Vec<AudioTrack>,
    pub subtitle_tracks: Vec<SubtitleTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTrack {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrack {
    pub codec: String,
    pub channels: u32,
    pub sample_rate: Option<u32>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub codec: String,
    pub language: Option<String>,
}

// Raw ffprobe JSON shapes. `format` is mandatory: output without it is not a
// well-formed probe record.

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
}

/// Probe a media file using the configured ffprobe binary.
pub async fn probe_media(config: &EngineConfig, path: &Path) -> Result<MediaInfo> {
    let output = tokio::process::Command::new(&config.ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::tool_not_found(config.ffprobe_path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::engine(stderr.trim().to_string()));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|e| Error::parse_error("ffprobe", format!("invalid UTF-8: {}", e)))?;

    parse_ffprobe_json(&json)
}

/// Parse ffprobe JSON output into a [`MediaInfo`].
///
/// A record that does not deserialize (missing `format` section, malformed
/// JSON) is rejected -- this is the validation step for probe jobs.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaInfo> {
    let raw: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::parse_error("ffprobe", e.to_string()))?;

    let mut info = MediaInfo {
        container: raw.format.format_name,
        duration_seconds: raw.format.duration.and_then(|s| s.parse().ok()),
        size_bytes: raw.format.size.and_then(|s| s.parse().ok()),
        bit_rate: raw.format.bit_rate.and_then(|s| s.parse().ok()),
        video_tracks: Vec::new(),
        audio_tracks: Vec::new(),
        subtitle_tracks: Vec::new(),
    };

    for stream in raw.streams {
        match stream.codec_type.as_str() {
            "video" => info.video_tracks.push(VideoTrack {
                codec: stream.codec_name.unwrap_or_default(),
                width: stream.width.unwrap_or(0),
                height: stream.height.unwrap_or(0),
                frame_rate: stream.r_frame_rate.as_deref().and_then(parse_frame_rate),
            }),
            "audio" => info.audio_tracks.push(AudioTrack {
                codec: stream.codec_name.unwrap_or_default(),
                channels: stream.channels.unwrap_or(2),
                sample_rate: stream.sample_rate.and_then(|s| s.parse().ok()),
                language: stream.tags.language,
            }),
            "subtitle" => info.subtitle_tracks.push(SubtitleTrack {
                codec: stream.codec_name.unwrap_or_default(),
                language: stream.tags.language,
            }),
            _ => {}
        }
    }

    Ok(info)
}

fn parse_frame_rate(rate: &str) -> Option<f64> {
    if let Some((num, den)) = rate.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den != 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate.parse().ok()
}
