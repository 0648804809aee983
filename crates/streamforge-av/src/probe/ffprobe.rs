//! FFprobe-based media probing.

use super::types::*;
use crate::command::ToolCommand;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Probes should be quick; anything slower than this is treated as stuck.
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    channel_layout: Option<String>,
    sample_rate: Option<String>,
    bit_rate: Option<String>,
}

/// Probe a media file using the ffprobe at `ffprobe`.
///
/// # Errors
///
/// - [`Error::FileNotFound`] if `path` does not exist.
/// - [`Error::ToolFailed`] / [`Error::Launch`] if ffprobe fails.
/// - [`Error::ParseError`] if the output has no recognizable format.
pub async fn probe_with_ffprobe(
    ffprobe: &Path,
    path: &Path,
    cancel: CancellationToken,
) -> Result<MediaInfo> {
    if !path.is_file() {
        return Err(Error::file_not_found(path));
    }

    let output = ToolCommand::new(ffprobe.to_path_buf())
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path.to_string_lossy())
        .timeout(PROBE_TIMEOUT)
        .cancel_on(cancel)
        .execute()
        .await?;

    let ff_output: FfprobeOutput = serde_json::from_str(&output.stdout)?;
    let info = parse_ffprobe_output(path, ff_output)?;

    tracing::info!(
        "Media info read: {} (V:{}, A:{})",
        info.file_name,
        info.video.as_ref().map_or("-", |v| v.codec.as_str()),
        info.audio.as_ref().map_or("-", |a| a.codec.as_str()),
    );

    Ok(info)
}

fn parse_ffprobe_output(path: &Path, output: FfprobeOutput) -> Result<MediaInfo> {
    let format = output
        .format
        .filter(|f| !f.format_name.is_empty())
        .ok_or_else(|| {
            tracing::warn!("ffprobe did not recognize the format of {}", path.display());
            Error::parse_error("ffprobe", format!("unknown format: {}", path.display()))
        })?;

    let duration = format
        .duration
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64);

    let mut info = MediaInfo {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        full_path: std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
        file_size: format.size.and_then(|s| s.parse().ok()),
        container_format: format.format_name,
        duration,
        video: None,
        audio: None,
    };

    for stream in output.streams {
        match stream.codec_type.as_deref() {
            Some("video") if info.video.is_none() => {
                info.video = Some(VideoStream {
                    codec: stream.codec_name.unwrap_or_default(),
                    width: stream.width,
                    height: stream.height,
                    frame_rate: stream.r_frame_rate.and_then(|s| parse_frame_rate(&s)),
                    bit_rate: stream.bit_rate.and_then(|s| s.parse().ok()),
                });
            }
            Some("audio") if info.audio.is_none() => {
                info.audio = Some(AudioStream {
                    codec: stream.codec_name.unwrap_or_default(),
                    channels: stream.channels,
                    channel_layout: stream.channel_layout,
                    sample_rate: stream.sample_rate.and_then(|s| s.parse().ok()),
                    bit_rate: stream.bit_rate.and_then(|s| s.parse().ok()),
                });
            }
            _ => {}
        }
    }

    Ok(info)
}

fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    let parts: Vec<&str> = rate_str.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().ok()?;
        let den: f64 = parts[1].parse().ok()?;
        if den != 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate_str.parse().ok()
}
