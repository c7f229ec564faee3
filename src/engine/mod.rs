//! External engine process supervision.
//!
//! One engine invocation runs per job. The supervisor translates an
//! [`Operation`] into the engine's argument contract, spawns the process,
//! surfaces started/progress/ended events, and terminates the child on
//! cancellation. It owns no files: paths come from the workspace and the
//! engine writes only to the output path it is given.

pub mod probe;
pub mod progress;

pub use probe::{probe_media, MediaInfo};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::operation::Operation;
use progress::ProgressParser;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Lifecycle events surfaced while an engine invocation runs.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The process was spawned. Carries a loggable command description.
    Started { command: String },
    /// The engine reported transcode position; fraction is in `0.0..=1.0`.
    Progress { fraction: f64 },
    /// The process exited.
    Ended { success: bool },
}

/// A fully-described engine invocation, ready to spawn.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    description: String,
    /// Collect stdout as the artifact (probe) instead of parsing progress.
    capture_stdout: bool,
}

impl Invocation {
    /// Loggable description of the command line.
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Captured output of a successful invocation.
#[derive(Debug)]
pub struct EngineOutput {
    /// Captured stdout; empty unless the invocation captures it.
    pub stdout: String,
}

/// Spawns and supervises one engine process per job.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: EngineConfig,
}

impl Supervisor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Engine configuration this supervisor spawns with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the transcode invocation for a file-producing operation.
    pub fn transform_invocation(
        &self,
        operation: &Operation,
        input: &Path,
        output: &Path,
    ) -> Invocation {
        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-progress".into(),
            "pipe:1".into(),
            "-nostats".into(),
            "-i".into(),
            input.into(),
        ];

        match operation {
            Operation::ExtractAudio => {
                args.extend(["-vn", "-acodec", "libmp3lame", "-f", "mp3"].map(OsString::from));
            }
            Operation::RemixSurround => {
                args.extend(["-vn", "-c:a", "aac", "-ac", "6"].map(OsString::from));
            }
            Operation::ResizeFrame { width, height } => {
                args.extend([
                    OsString::from("-vf"),
                    OsString::from(format!("scale={}:{}", width, height)),
                ]);
                args.extend(["-c:v", "libx264", "-c:a", "copy"].map(OsString::from));
            }
            Operation::StripAudio => {
                args.extend(["-an", "-c:v", "copy", "-movflags", "+faststart"].map(OsString::from));
            }
            Operation::ProbeMetadata => {
                // Probes go through probe_invocation; nothing sensible to add here.
            }
        }

        args.push(output.into());
        self.invocation(self.config.ffmpeg_path.clone().into(), args, false)
    }

    /// Build the metadata probe invocation.
    pub fn probe_invocation(&self, input: &Path) -> Invocation {
        let mut args: Vec<OsString> = [
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]
        .map(OsString::from)
        .to_vec();
        args.push(input.into());
        self.invocation(self.config.ffprobe_path.clone().into(), args, true)
    }

    fn invocation(&self, program: OsString, args: Vec<OsString>, capture_stdout: bool) -> Invocation {
        let description = std::iter::once(&program)
            .chain(args.iter())
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        Invocation {
            program,
            args,
            description,
            capture_stdout,
        }
    }

    /// Run an invocation to completion.
    ///
    /// Emits `Started` once, `Progress` as the engine reports position (scaled
    /// by `duration_hint` seconds), and `Ended` when the process exits. A
    /// non-zero exit becomes [`Error::Engine`] carrying the stderr tail; a
    /// cancellation kills the child, waits for it to actually exit, and
    /// returns [`Error::Cancelled`].
    pub async fn run(
        &self,
        invocation: Invocation,
        duration_hint: Option<f64>,
        mut on_event: impl FnMut(EngineEvent),
        cancel: &CancellationToken,
    ) -> Result<EngineOutput> {
        let mut child = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::tool_not_found(invocation.program.to_string_lossy().into_owned())
                } else {
                    Error::Io(e)
                }
            })?;

        tracing::debug!(command = %invocation.description, "Spawned engine process");
        on_event(EngineEvent::Started {
            command: invocation.description.clone(),
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::engine("engine stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::engine("engine stderr unavailable"))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();

        let mut parser = ProgressParser::new(duration_hint);
        let mut captured = String::new();
        let mut tail = String::new();
        let mut out_done = false;
        let mut err_done = false;
        let mut cancel_requested = false;

        while !(out_done && err_done) {
            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !cancel_requested => {
                    cancel_requested = true;
                    tracing::info!("Terminating engine process on cancellation");
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("Failed to signal engine process: {}", e);
                    }
                }
                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(line)) => {
                        if invocation.capture_stdout {
                            captured.push_str(&line);
                            captured.push('\n');
                        } else if let Some(fraction) = parser.push_line(&line) {
                            on_event(EngineEvent::Progress { fraction });
                        }
                    }
                    Ok(None) => out_done = true,
                    Err(e) => {
                        tracing::warn!("Error reading engine stdout: {}", e);
                        out_done = true;
                    }
                },
                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(line)) => push_tail(&mut tail, &line, self.config.diagnostic_limit),
                    Ok(None) => err_done = true,
                    Err(e) => {
                        tracing::warn!("Error reading engine stderr: {}", e);
                        err_done = true;
                    }
                },
            }
        }

        // The streams are closed; the exit status is imminent. On cancellation
        // this is where we guarantee the process is truly gone before the job
        // reports Cancelled, so cleanup never races a live writer.
        let status = child.wait().await?;
        on_event(EngineEvent::Ended {
            success: status.success(),
        });

        if cancel_requested {
            return Err(Error::Cancelled);
        }

        if !status.success() {
            let diagnostic = if tail.trim().is_empty() {
                format!("engine exited with {}", status)
            } else {
                tail.trim().to_string()
            };
            return Err(Error::engine(diagnostic));
        }

        Ok(EngineOutput { stdout: captured })
    }
}

/// Append a diagnostic line, keeping only the newest `limit` bytes.
fn push_tail(tail: &mut String, line: &str, limit: usize) {
    tail.push_str(line);
    tail.push('\n');
    if tail.len() > limit {
        let mut excess = tail.len() - limit;
        while !tail.is_char_boundary(excess) {
            excess += 1;
        }
        tail.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn supervisor() -> Supervisor {
        Supervisor::new(EngineConfig::default())
    }

    fn args_of(invocation: &Invocation) -> Vec<String> {
        invocation
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_extract_audio_invocation() {
        let inv = supervisor().transform_invocation(
            &Operation::ExtractAudio,
            &PathBuf::from("/w/source.mp4"),
            &PathBuf::from("/w/output.mp3"),
        );
        let args = args_of(&inv);
        assert!(args.contains(&"-vn".to_string()));
        assert!(args.contains(&"libmp3lame".to_string()));
        assert_eq!(args.last().unwrap(), "/w/output.mp3");
        // Progress reporting is always requested for transforms.
        assert!(args.contains(&"-progress".to_string()));
    }

    #[test]
    fn test_remix_surround_invocation() {
        let inv = supervisor().transform_invocation(
            &Operation::RemixSurround,
            &PathBuf::from("/w/source.mp4"),
            &PathBuf::from("/w/output.m4a"),
        );
        let args = args_of(&inv);
        let ac = args.iter().position(|a| a == "-ac").unwrap();
        assert_eq!(args[ac + 1], "6");
        assert!(args.contains(&"aac".to_string()));
    }

    #[test]
    fn test_resize_invocation_has_scale_filter() {
        let inv = supervisor().transform_invocation(
            &Operation::ResizeFrame {
                width: 1280,
                height: 720,
            },
            &PathBuf::from("/w/source.mp4"),
            &PathBuf::from("/w/output.mp4"),
        );
        let args = args_of(&inv);
        assert!(args.contains(&"scale=1280:720".to_string()));
    }

    #[test]
    fn test_strip_audio_invocation() {
        let inv = supervisor().transform_invocation(
            &Operation::StripAudio,
            &PathBuf::from("/w/source.mp4"),
            &PathBuf::from("/w/output.mp4"),
        );
        let args = args_of(&inv);
        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_probe_invocation_captures_stdout() {
        let inv = supervisor().probe_invocation(&PathBuf::from("/w/source.mp4"));
        assert!(inv.capture_stdout);
        let args = args_of(&inv);
        assert!(args.contains(&"-show_streams".to_string()));
    }

    #[test]
    fn test_push_tail_keeps_newest() {
        let mut tail = String::new();
        push_tail(&mut tail, "first line", 16);
        push_tail(&mut tail, "second line", 16);
        assert!(tail.len() <= 16);
        assert!(tail.contains("second"));
        assert!(!tail.contains("first"));
    }
}
