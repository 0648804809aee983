//! Streaming conversion entry point.
//!
//! [`Converter::convert`] admits a request through the shared
//! [`ConcurrencyLimiter`], launches ffmpeg and returns immediately with a
//! [`ConversionHandle`]: the live stdout stream plus a [`Completion`] that
//! resolves once the process has exited, failed or been canceled.
//!
//! Per request the lifecycle is `Admitted -> Running -> {Succeeded | Failed
//! | Canceled}`. Validation and launch errors are returned synchronously;
//! everything after the spawn is reported through the completion.
//!
//! # Example
//!
//! ```no_run
//! use streamforge_av::{ConversionRequest, Converter, ConverterConfig};
//!
//! # async fn example() -> streamforge_av::Result<()> {
//! let converter = Converter::new(ConverterConfig::default())?;
//! let handle = converter
//!     .convert(ConversionRequest::new("/media/input.avi"))
//!     .await?;
//! let (mut output, completion) = handle.into_parts();
//! let mut file = tokio::fs::File::create("/media/output.mp4").await?;
//! tokio::io::copy(&mut output, &mut file).await?;
//! completion.await.into_result("ffmpeg")?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::args::{TranscodeArgs, WaveformStyle, DEFAULT_AUDIO_CODEC};
use crate::cancel::CancelScope;
use crate::completion::{self, Completion};
use crate::limiter::{ConcurrencyLimiter, DEFAULT_CAPACITY};
use crate::process::{OutputStream, ProcessHandle, StdoutMode};
use crate::supervisor::supervise;
use crate::{tools, Error, Result};

/// Default ceiling on a single ffmpeg run.
pub const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(30 * 60);

/// Settings for a [`Converter`].
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// ffmpeg executable: a path, or a bare name looked up in `PATH`.
    pub ffmpeg: PathBuf,
    /// Maximum simultaneously running ffmpeg processes.
    pub max_concurrent: usize,
    /// Hard limit on process run time, independent of the caller's deadline.
    pub max_runtime: Duration,
    /// Lossless audio codec for the output.
    pub audio_codec: String,
    pub waveform_style: WaveformStyle,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            max_concurrent: DEFAULT_CAPACITY,
            max_runtime: DEFAULT_MAX_RUNTIME,
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            waveform_style: WaveformStyle::default(),
        }
    }
}

/// One conversion to run.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input: PathBuf,
    /// Where to write the waveform PNG, if one is wanted.
    pub waveform: Option<PathBuf>,
    pub cancel: CancellationToken,
    /// Caller deadline, measured from the call to `convert`.
    pub deadline: Option<Duration>,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            waveform: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn waveform(mut self, path: impl Into<PathBuf>) -> Self {
        self.waveform = Some(path.into());
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// What the caller gets back from a successful launch.
///
/// The caller owns `output` and must drain or drop it; success is only
/// certain once `completion` resolves to
/// [`CompletionOutcome::Success`](crate::CompletionOutcome::Success).
#[derive(Debug)]
pub struct ConversionHandle {
    pub output: OutputStream,
    pub completion: Completion,
    pid: Option<u32>,
}

impl ConversionHandle {
    /// Process id of the running ffmpeg.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn into_parts(self) -> (OutputStream, Completion) {
        (self.output, self.completion)
    }
}

/// Runs streaming ffmpeg conversions under a shared concurrency limit.
#[derive(Debug, Clone)]
pub struct Converter {
    ffmpeg: PathBuf,
    limiter: ConcurrencyLimiter,
    max_runtime: Duration,
    args: TranscodeArgs,
}

impl Converter {
    /// Create a converter with its own limiter sized by `config.max_concurrent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ToolNotFound`] if the ffmpeg executable cannot be found.
    pub fn new(config: ConverterConfig) -> Result<Self> {
        let limiter = ConcurrencyLimiter::new(config.max_concurrent);
        Self::with_limiter(config, limiter)
    }

    /// Create a converter that shares an existing limiter.
    pub fn with_limiter(config: ConverterConfig, limiter: ConcurrencyLimiter) -> Result<Self> {
        let ffmpeg = tools::resolve_tool(&config.ffmpeg)?;
        Ok(Self {
            ffmpeg,
            limiter,
            max_runtime: config.max_runtime,
            args: TranscodeArgs::new(config.audio_codec).waveform_style(config.waveform_style),
        })
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Resolved ffmpeg path.
    pub fn program(&self) -> &Path {
        &self.ffmpeg
    }

    /// Admit and launch one conversion.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the input is missing, not a regular file
    ///   or unreadable, or a path argument is empty. No slot is consumed.
    /// - [`Error::Canceled`] if the request is canceled or its deadline
    ///   passes while waiting for a slot. No slot is consumed.
    /// - [`Error::Launch`] if ffmpeg cannot be started. The slot is released.
    pub async fn convert(&self, request: ConversionRequest) -> Result<ConversionHandle> {
        validate_input(&request.input).await?;
        let args = self
            .args
            .build(&request.input, request.waveform.as_deref())?;

        let mut scope = CancelScope::new(request.cancel, request.deadline);
        let slot = self.limiter.acquire(&scope).await?;

        let mut process = ProcessHandle::spawn(&self.ffmpeg, &args, StdoutMode::Stream)?;
        scope.arm_ceiling(self.max_runtime);

        let pid = process.pid();
        tracing::info!(
            "{} started. PID: {:?}, Input: {}",
            process.tool(),
            pid,
            request.input.display()
        );

        let output = process.take_output().ok_or_else(|| {
            Error::Io(std::io::Error::other("stdout of the spawned process was not captured"))
        })?;

        let (completer, completion) = completion::channel();
        tokio::spawn(supervise(process, slot, scope, completer));

        Ok(ConversionHandle {
            output,
            completion,
            pid,
        })
    }
}

/// Check that `path` names an existing, readable regular file.
pub(crate) async fn validate_input(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidInput("input path is empty".into()));
    }

    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::InvalidInput(format!("input file not found: {}", path.display()))
        } else {
            Error::InvalidInput(format!("cannot access {}: {e}", path.display()))
        }
    })?;

    if !meta.is_file() {
        return Err(Error::InvalidInput(format!(
            "input is not a regular file: {}",
            path.display()
        )));
    }

    tokio::fs::File::open(path).await.map_err(|e| {
        Error::InvalidInput(format!("input file is not readable: {}: {e}", path.display()))
    })?;

    Ok(())
}
