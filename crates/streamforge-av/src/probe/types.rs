//! Media information types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Summary of a media file: container plus its first video and audio stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// File name without directories.
    pub file_name: String,
    /// Absolute path to the file.
    pub full_path: PathBuf,
    /// File size in bytes, if reported.
    pub file_size: Option<u64>,
    /// Container format (e.g., "matroska,webm", "avi").
    pub container_format: String,
    /// Duration of the media.
    pub duration: Option<Duration>,
    /// First video stream, if any.
    pub video: Option<VideoStream>,
    /// First audio stream, if any.
    pub audio: Option<AudioStream>,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }
}

/// Information about a video stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStream {
    /// Video codec (e.g., "h264", "mpeg4").
    pub codec: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Frame rate in FPS.
    pub frame_rate: Option<f64>,
    /// Bit rate in bits per second.
    pub bit_rate: Option<u64>,
}

/// Information about an audio stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStream {
    /// Audio codec (e.g., "aac", "mp3", "pcm_s16le").
    pub codec: String,
    pub channels: Option<u32>,
    /// Channel layout (e.g., "stereo", "5.1").
    pub channel_layout: Option<String>,
    /// Sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Bit rate in bits per second.
    pub bit_rate: Option<u64>,
}

/// Format a duration as `hh:mm:ss.fff`.
pub fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
