use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediaforge")]
#[command(author, version, about = "Media transcoding job service")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the transcoding server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single operation locally through the pipeline
    Run {
        /// Input media file
        #[arg(required = true)]
        input: PathBuf,

        /// Operation to perform
        #[arg(long, value_enum)]
        operation: OperationArg,

        /// Target width (resize-frame)
        #[arg(long)]
        width: Option<i64>,

        /// Target height (resize-frame)
        #[arg(long)]
        height: Option<i64>,

        /// Where to write the artifact (defaults to a name derived from the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Probe a media file and display information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Submit a file to a running server and download the result
    Submit {
        /// File to upload
        #[arg(required = true)]
        file: PathBuf,

        /// Operation to perform
        #[arg(long, value_enum)]
        operation: OperationArg,

        /// Target width (resize-frame)
        #[arg(long)]
        width: Option<i64>,

        /// Target height (resize-frame)
        #[arg(long)]
        height: Option<i64>,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8350")]
        server: String,

        /// Where to save the artifact (defaults to the server's suggestion)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

/// CLI-facing operation names; mirrors the pipeline's operation set.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OperationArg {
    ExtractAudio,
    ProbeMetadata,
    RemixSurround,
    ResizeFrame,
    StripAudio,
}

impl OperationArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationArg::ExtractAudio => "extract-audio",
            OperationArg::ProbeMetadata => "probe-metadata",
            OperationArg::RemixSurround => "remix-surround",
            OperationArg::ResizeFrame => "resize-frame",
            OperationArg::StripAudio => "strip-audio",
        }
    }
}
