//! Standalone waveform rendering.
//!
//! Renders the first audio stream of a file into one PNG with ffmpeg's
//! `showwavespic` filter. Runs share the converter's limiter so waveform jobs
//! and conversions together never exceed the configured process count.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempPath;
use tokio_util::sync::CancellationToken;

use crate::args::{waveform_args, WaveformStyle};
use crate::cancel::CancelScope;
use crate::completion;
use crate::converter::validate_input;
use crate::limiter::ConcurrencyLimiter;
use crate::process::{ProcessHandle, StdoutMode};
use crate::supervisor::supervise;
use crate::{tools, Result};

/// Default limit for one waveform run, including time spent queued.
pub const DEFAULT_WAVEFORM_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Renders waveform images under a shared concurrency limit.
#[derive(Debug, Clone)]
pub struct WaveformGenerator {
    ffmpeg: PathBuf,
    limiter: ConcurrencyLimiter,
    style: WaveformStyle,
    timeout: Duration,
}

impl WaveformGenerator {
    /// # Errors
    ///
    /// Returns [`Error::ToolNotFound`](crate::Error::ToolNotFound) if ffmpeg
    /// cannot be found.
    pub fn new(ffmpeg: &Path, limiter: ConcurrencyLimiter, style: WaveformStyle) -> Result<Self> {
        Ok(Self {
            ffmpeg: tools::resolve_tool(ffmpeg)?,
            limiter,
            style,
            timeout: DEFAULT_WAVEFORM_TIMEOUT,
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render into a new temporary `.png`. The file is deleted when the
    /// returned [`TempPath`] is dropped unless the caller keeps it.
    pub async fn generate(&self, input: &Path, cancel: CancellationToken) -> Result<TempPath> {
        let output = tempfile::Builder::new()
            .prefix("waveform-")
            .suffix(".png")
            .tempfile()?
            .into_temp_path();
        self.generate_to(input, &output, cancel).await?;
        Ok(output)
    }

    /// Render into `output`, overwriting it.
    pub async fn generate_to(
        &self,
        input: &Path,
        output: &Path,
        cancel: CancellationToken,
    ) -> Result<()> {
        validate_input(input).await?;
        let args = waveform_args(&self.style, input, output)?;

        let scope = CancelScope::new(cancel, Some(self.timeout));
        let slot = self.limiter.acquire(&scope).await?;
        let process = ProcessHandle::spawn(&self.ffmpeg, &args, StdoutMode::Discard)?;
        let tool = process.tool().to_string();

        tracing::info!(
            "{tool} waveform started, PID {:?}, Input: {}, Output: {}",
            process.pid(),
            input.display(),
            output.display()
        );

        let (completer, completion) = completion::channel();
        supervise(process, slot, scope, completer).await;
        completion.await.into_result(&tool)
    }
}
