use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "streamforge")]
#[command(
    author,
    version,
    about = "Convert media to streamable MP4 with lossless audio using ffmpeg"
)]
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
    /// Convert a file to fragmented MP4 with lossless audio
    Convert {
        /// Input file to convert
        #[arg(required = true)]
        input: PathBuf,

        /// Output file ("-" for stdout; default: input name with .mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also render a waveform image to this path
        #[arg(long)]
        waveform: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Render the audio waveform of a file to a PNG
    Waveform {
        /// Input file
        #[arg(required = true)]
        input: PathBuf,

        /// Output image (default: input name with .png)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Probe, convert and upload a file to the configured storage
    Process {
        /// Input file to process
        #[arg(required = true)]
        input: PathBuf,
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
