mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, OperationArg};
use mediaforge::{
    client::{Delivered, ForgeClient},
    config,
    dispatcher::Dispatcher,
    engine,
    job::{JobState, Outcome},
    operation::Operation,
    server, tools,
};
use std::io::Write as _;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediaforge=trace,tower_http=debug".to_string()
        } else {
            "mediaforge=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config::load_config_or_default(cli.config.as_deref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            tracing::info!(
                "Starting mediaforge server on {}:{}",
                config.server.host,
                config.server.port
            );

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(server::start_server(config))
        }
        Commands::Run {
            input,
            operation,
            width,
            height,
            output,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_local(
                config,
                &input,
                operation,
                width,
                height,
                output.as_deref(),
            ))
        }
        Commands::Probe { file, json } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(config, &file, json))
        }
        Commands::Submit {
            file,
            operation,
            width,
            height,
            server,
            output,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(submit_remote(
                &server,
                &file,
                operation,
                width,
                height,
                output.as_deref(),
            ))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediaforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Drive one operation through the local pipeline, with progress on the
/// terminal.
async fn run_local(
    config: config::Config,
    input: &Path,
    operation: OperationArg,
    width: Option<i64>,
    height: Option<i64>,
    output: Option<&Path>,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }

    let operation = Operation::from_request(operation.as_str(), width, height)?;
    let dispatcher = Dispatcher::new(&config.scratch, &config.engine);

    let source_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());

    let id = dispatcher.submit(input, &source_name, operation).await?;

    use futures::StreamExt;
    let mut updates = dispatcher.observe(id)?;
    while let Some(update) = updates.next().await {
        if update.state.is_terminal() {
            break;
        }
        if update.state == JobState::Running && update.progress > 0.0 {
            print!("\rProcessing: {:>5.1}%", update.progress * 100.0);
            std::io::stdout().flush().ok();
        }
    }
    println!();

    let fetched = dispatcher.fetch(id).await?;
    match fetched.outcome {
        Ok(Outcome::Metadata(info)) => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Ok(Outcome::File {
            path,
            file_name,
            size_bytes,
            ..
        }) => {
            let dest = output
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(&file_name));
            tokio::fs::copy(&path, &dest).await?;
            println!("Wrote {} ({} bytes)", dest.display(), size_bytes);
        }
        Err(failure) => {
            anyhow::bail!("Job failed ({:?}): {}", failure.kind, failure.message);
        }
    }

    Ok(())
}

async fn probe_file(config: config::Config, file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let info = engine::probe_media(&config.engine, file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Container: {}", info.container);
    if let Some(size) = info.size_bytes {
        println!("Size: {} bytes", size);
    }
    if let Some(duration) = info.duration_seconds {
        let secs = duration as u64;
        println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
    }

    println!("\nVideo Tracks: {}", info.video_tracks.len());
    for (i, track) in info.video_tracks.iter().enumerate() {
        print!("  [{}] {} {}x{}", i, track.codec, track.width, track.height);
        if let Some(fps) = track.frame_rate {
            print!(" {:.3} fps", fps);
        }
        println!();
    }

    println!("\nAudio Tracks: {}", info.audio_tracks.len());
    for (i, track) in info.audio_tracks.iter().enumerate() {
        print!("  [{}] {} {}ch", i, track.codec, track.channels);
        if let Some(ref lang) = track.language {
            print!(" ({})", lang);
        }
        println!();
    }

    println!("\nSubtitle Tracks: {}", info.subtitle_tracks.len());
    for (i, track) in info.subtitle_tracks.iter().enumerate() {
        print!("  [{}] {}", i, track.codec);
        if let Some(ref lang) = track.language {
            print!(" ({})", lang);
        }
        println!();
    }

    Ok(())
}

async fn submit_remote(
    server: &str,
    file: &Path,
    operation: OperationArg,
    width: Option<i64>,
    height: Option<i64>,
    output: Option<&Path>,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let client = ForgeClient::new(server);
    let job = client.submit(file, operation.as_str(), width, height).await?;
    println!("Submitted job {} ({})", job.id, job.state);

    match client.deliver_result(&job.id, output).await? {
        Delivered::File(path) => println!("Saved {}", path.display()),
        Delivered::Metadata(json) => println!("{}", json),
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    println!("Checking external tools...\n");

    let results = tools::check_tools(&config.engine);
    let mut all_ok = true;

    for tool in &results {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all operations.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Scratch root: {}", config.scratch.root.display());
            println!("  Retention: {}s", config.scratch.retention_secs);
            println!("  FFmpeg: {}", config.engine.ffmpeg_path.display());
            println!("  FFprobe: {}", config.engine.ffprobe_path.display());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Scratch root: {}", config.scratch.root.display());
        }
    }

    Ok(())
}
