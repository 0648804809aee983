//! End-to-end processing of one source file.
//!
//! Probe the source, convert it to fragmented MP4 with lossless audio while
//! streaming the output straight into storage, then upload the waveform
//! rendered by the same ffmpeg run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use streamforge_av::probe::{self, MediaInfo};
use streamforge_av::{CancellationToken, ConcurrencyLimiter, ConversionRequest, Converter};
use tempfile::TempPath;
use uuid::Uuid;

use crate::config::Config;
use crate::storage::{self, Storage};

/// Storage prefix for converted videos.
pub const VIDEO_PREFIX: &str = "converted";
/// Storage prefix for waveform images.
pub const WAVEFORM_PREFIX: &str = "waveforms";

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub media: MediaInfo,
    /// Storage key of the converted video.
    pub video_key: String,
    /// Storage key of the waveform image.
    pub waveform_key: String,
    pub video_bytes: u64,
    pub elapsed: Duration,
}

pub struct Processor {
    converter: Converter,
    ffprobe: PathBuf,
    storage: Arc<dyn Storage>,
}

impl Processor {
    pub fn new(converter: Converter, ffprobe: PathBuf, storage: Arc<dyn Storage>) -> Self {
        Self {
            converter,
            ffprobe,
            storage,
        }
    }

    /// Build the converter and storage backend described by `config`.
    pub fn from_config(config: &Config, limiter: ConcurrencyLimiter) -> anyhow::Result<Self> {
        let converter = Converter::with_limiter(config.converter_config(), limiter)
            .context("Failed to set up ffmpeg")?;
        let storage = storage::from_config(&config.storage).context("Failed to open storage")?;
        Ok(Self::new(
            converter,
            config.ffmpeg.ffprobe_path.clone(),
            storage,
        ))
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Run the whole flow for `input`.
    ///
    /// Sources without an audio track are refused before any conversion
    /// starts. If the conversion fails after its output was uploaded, the
    /// partial video is deleted again. The temporary waveform file is always
    /// removed.
    pub async fn process_file(
        &self,
        input: &Path,
        cancel: CancellationToken,
    ) -> anyhow::Result<ProcessReport> {
        let started = Instant::now();

        if !input.is_file() {
            anyhow::bail!("Input file does not exist: {:?}", input);
        }

        let media = probe::probe_with_ffprobe(&self.ffprobe, input, cancel.clone())
            .await
            .with_context(|| format!("Failed to probe {:?}", input))?;

        if !media.has_audio() {
            tracing::warn!("{} has no audio track; skipping conversion", media.file_name);
            anyhow::bail!("{} has no audio track", media.file_name);
        }

        let id = Uuid::new_v4();
        let waveform_file = TempPath::from_path(std::env::temp_dir().join(format!("{id}.png")));
        let video_key = video_key_for(input);
        let waveform_key = format!("{WAVEFORM_PREFIX}/{id}.png");

        // Child token so a failed upload can stop ffmpeg without touching
        // the caller's token.
        let run = cancel.child_token();
        let handle = self
            .converter
            .convert(
                ConversionRequest::new(input)
                    .waveform(&*waveform_file)
                    .cancel_token(run.clone()),
            )
            .await
            .with_context(|| format!("Failed to start conversion of {:?}", input))?;
        let (mut output, completion) = handle.into_parts();

        let uploaded = self.storage.upload_stream(&video_key, &mut output).await;
        drop(output);

        let video_bytes = match uploaded {
            Ok(n) => n,
            Err(e) => {
                run.cancel();
                let outcome = completion.await;
                tracing::debug!("Conversion stopped after failed upload: {outcome:?}");
                return Err(e).with_context(|| format!("Failed to upload {video_key}"));
            }
        };
        tracing::info!("Video uploaded: {video_key}");

        if let Err(e) = completion.await.into_result("ffmpeg") {
            if let Err(rm) = self.storage.delete(&video_key).await {
                tracing::warn!("Failed to remove partial video {video_key}: {rm}");
            }
            return Err(e).with_context(|| format!("Conversion of {:?} failed", input));
        }

        let mut waveform = tokio::fs::File::open(&waveform_file)
            .await
            .context("ffmpeg did not produce a waveform image")?;
        self.storage
            .upload_stream(&waveform_key, &mut waveform)
            .await
            .with_context(|| format!("Failed to upload {waveform_key}"))?;
        tracing::info!("Waveform uploaded: {waveform_key}");

        Ok(ProcessReport {
            media,
            video_key,
            waveform_key,
            video_bytes,
            elapsed: started.elapsed(),
        })
    }
}

/// `converted/<stem>.mp4` for the given source.
fn video_key_for(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());
    format!("{VIDEO_PREFIX}/{stem}.mp4")
}
