//! # streamforge-av
//!
//! Orchestration of short-lived ffmpeg processes under bounded concurrency.
//!
//! This crate provides:
//!
//! - **Streaming conversion** ([`Converter`]) -- admit a request, launch
//!   ffmpeg, hand back its stdout as a live fragmented-MP4 stream plus a
//!   [`Completion`] that resolves exactly once.
//! - **Admission control** ([`ConcurrencyLimiter`]) -- a FIFO counting gate
//!   whose [`ProcessSlot`]s are released on drop.
//! - **Cancellation** ([`CancelScope`]) -- caller token OR deadline OR a
//!   run-time ceiling; firing kills the process and resolves
//!   [`CompletionOutcome::Canceled`].
//! - **Argument construction** ([`TranscodeArgs`], [`escape`]) -- the
//!   transcode command line and Windows-safe quoting.
//! - **Waveforms** ([`WaveformGenerator`]) -- render the audio track to a PNG
//!   under the same limiter.
//! - **Probing** ([`probe::probe_with_ffprobe`]) and **tool discovery**
//!   ([`check_tools`], [`resolve_tool`]).
//!
//! ## Example
//!
//! ```no_run
//! use streamforge_av::{ConversionRequest, Converter, ConverterConfig, CompletionOutcome};
//!
//! # async fn example() -> streamforge_av::Result<()> {
//! let converter = Converter::new(ConverterConfig {
//!     max_concurrent: 2,
//!     ..ConverterConfig::default()
//! })?;
//! let handle = converter
//!     .convert(ConversionRequest::new("/media/in.avi").waveform("/tmp/wave.png"))
//!     .await?;
//! let (mut output, completion) = handle.into_parts();
//! tokio::io::copy(&mut output, &mut tokio::io::sink()).await?;
//! match completion.await {
//!     CompletionOutcome::Success => println!("done"),
//!     CompletionOutcome::Failed { diagnostics, exit_code } => {
//!         eprintln!("ffmpeg exited with {exit_code:?}: {diagnostics}")
//!     }
//!     CompletionOutcome::Canceled(reason) => eprintln!("{reason}"),
//! }
//! # Ok(())
//! # }
//! ```

mod error;

pub mod args;
pub mod cancel;
pub mod command;
pub mod completion;
pub mod converter;
pub mod escape;
pub mod limiter;
pub mod probe;
pub mod process;
pub mod supervisor;
pub mod tools;
pub mod waveform;

// Re-exports
pub use args::{TranscodeArgs, WaveformStyle};
pub use cancel::{CancelReason, CancelScope};
pub use command::{ToolCommand, ToolOutput};
pub use completion::{Completer, Completion, CompletionOutcome};
pub use converter::{ConversionHandle, ConversionRequest, Converter, ConverterConfig};
pub use error::{Error, Result};
pub use limiter::{ConcurrencyLimiter, ProcessSlot};
pub use probe::MediaInfo;
pub use process::{OutputStream, ProcessHandle};
pub use tools::{check_tool, check_tools, resolve_tool, ToolInfo};
pub use waveform::WaveformGenerator;

// Re-exported so callers can build requests without a direct dependency.
pub use tokio_util::sync::CancellationToken;
