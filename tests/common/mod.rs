//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a dispatcher over a throwaway
//! scratch root and stub engine executables, so pipeline behavior can be
//! exercised without a real FFmpeg install. Stub scripts may reference
//! `{root}` in their body; it is substituted with the harness directory, and
//! every stock ffmpeg stub appends to `{root}/ffmpeg-runs.log` so tests can
//! assert whether a process was ever spawned.

#![allow(dead_code)]

use mediaforge::config::{Config, EngineConfig, ScratchConfig};
use mediaforge::dispatcher::Dispatcher;
use mediaforge::server::{create_router, AppContext};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// ffprobe stub: a 10-second clip with one video and one audio stream.
pub const FFPROBE_SCRIPT: &str = r#"#!/bin/sh
printf '%s' '{"format":{"format_name":"mov,mp4,m4a,3gp,3g2,mj2","duration":"10.000000","size":"1024","bit_rate":"838860"},"streams":[{"index":0,"codec_type":"video","codec_name":"h264","width":1920,"height":1080,"r_frame_rate":"30/1"},{"index":1,"codec_type":"audio","codec_name":"aac","channels":2,"sample_rate":"48000"}]}'
exit 0
"#;

/// ffmpeg stub: reports progress at 10%, 40%, 90% of the 10s clip, then
/// writes a non-empty artifact and exits cleanly.
pub const SUCCESS_FFMPEG: &str = r#"#!/bin/sh
echo run >> {root}/ffmpeg-runs.log
out=""
for a in "$@"; do out="$a"; done
printf 'out_time_us=1000000\nprogress=continue\n'
printf 'out_time_us=4000000\nprogress=continue\n'
printf 'out_time_us=9000000\nprogress=continue\n'
printf 'transcoded payload' > "$out"
exit 0
"#;

/// ffmpeg stub: exits zero but leaves a 0-byte artifact behind.
pub const EMPTY_OUTPUT_FFMPEG: &str = r#"#!/bin/sh
echo run >> {root}/ffmpeg-runs.log
out=""
for a in "$@"; do out="$a"; done
: > "$out"
exit 0
"#;

/// ffmpeg stub: fails with a diagnostic on stderr.
pub const FAILING_FFMPEG: &str = r#"#!/bin/sh
echo run >> {root}/ffmpeg-runs.log
echo 'Unsupported codec: mystery' >&2
exit 1
"#;

/// ffmpeg stub: never finishes on its own; used for cancellation tests.
pub const HANGING_FFMPEG: &str = r#"#!/bin/sh
echo run >> {root}/ffmpeg-runs.log
exec sleep 30
"#;

/// ffprobe stub: fails the way ffprobe does on a broken container.
pub const BROKEN_FFPROBE: &str = r#"#!/bin/sh
echo 'moov atom not found' >&2
exit 1
"#;

pub struct TestHarness {
    pub dispatcher: Dispatcher,
    pub config: Config,
    root: TempDir,
}

impl TestHarness {
    /// Harness with the given ffmpeg stub and the stock ffprobe stub.
    pub fn new(ffmpeg_script: &str) -> Self {
        Self::with_scripts(ffmpeg_script, FFPROBE_SCRIPT)
    }

    /// Harness with fully custom engine stubs.
    pub fn with_scripts(ffmpeg_script: &str, ffprobe_script: &str) -> Self {
        let root = TempDir::new().expect("failed to create harness dir");
        let root_str = root.path().to_string_lossy().into_owned();

        let bin = root.path().join("bin");
        std::fs::create_dir_all(&bin).expect("failed to create stub bin dir");
        let ffmpeg = write_script(&bin.join("ffmpeg"), &ffmpeg_script.replace("{root}", &root_str));
        let ffprobe = write_script(
            &bin.join("ffprobe"),
            &ffprobe_script.replace("{root}", &root_str),
        );

        let scratch_root = root.path().join("scratch");
        std::fs::create_dir_all(&scratch_root).expect("failed to create scratch root");

        let config = Config {
            scratch: ScratchConfig {
                root: scratch_root,
                ..ScratchConfig::default()
            },
            engine: EngineConfig {
                ffmpeg_path: ffmpeg,
                ffprobe_path: ffprobe,
                ..EngineConfig::default()
            },
            ..Config::default()
        };

        let dispatcher = Dispatcher::new(&config.scratch, &config.engine);

        Self {
            dispatcher,
            config,
            root,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(ffmpeg_script: &str) -> (Self, SocketAddr) {
        let harness = Self::new(ffmpeg_script);
        let ctx = AppContext {
            dispatcher: harness.dispatcher.clone(),
            config: Arc::new(harness.config.clone()),
        };
        let app = create_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Entries currently present under the scratch root.
    pub fn scratch_entries(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.config.scratch.root) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Wait (bounded) for the scratch area to drain; cleanup of a streamed
    /// artifact happens when the response body drops, which can trail the
    /// final byte by a moment.
    pub async fn wait_scratch_empty(&self) {
        for _ in 0..100 {
            if self.scratch_entries().is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!(
            "scratch area not cleaned up: {:?}",
            self.scratch_entries()
        );
    }

    /// How many times an ffmpeg stub was spawned.
    pub fn engine_run_count(&self) -> usize {
        match std::fs::read_to_string(self.root.path().join("ffmpeg-runs.log")) {
            Ok(log) => log.lines().count(),
            Err(_) => 0,
        }
    }

    /// Write a small input file and return its path.
    pub fn input_file(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        std::fs::write(&path, b"fake media payload").expect("failed to write input");
        path
    }
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, body).expect("failed to write stub script");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to mark stub executable");
    path.to_path_buf()
}

#[cfg(not(unix))]
fn write_script(path: &Path, body: &str) -> PathBuf {
    std::fs::write(path, body).expect("failed to write stub script");
    path.to_path_buf()
}
