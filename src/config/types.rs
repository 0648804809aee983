use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use streamforge_av::{ConverterConfig, WaveformStyle};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,

    #[serde(default)]
    pub waveform: WaveformStyle,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Settings for the streaming converter.
    pub fn converter_config(&self) -> ConverterConfig {
        ConverterConfig {
            ffmpeg: self.ffmpeg.path.clone(),
            max_concurrent: self.ffmpeg.max_concurrent,
            max_runtime: self.ffmpeg.max_runtime(),
            audio_codec: self.ffmpeg.audio_codec.clone(),
            waveform_style: self.waveform.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FfmpegConfig {
    /// ffmpeg executable; a bare name is looked up in `PATH`
    #[serde(default = "default_ffmpeg")]
    pub path: PathBuf,

    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: PathBuf,

    /// Maximum ffmpeg processes running at once (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Hard limit on one ffmpeg run, in seconds (default: 1800)
    #[serde(default = "default_max_runtime_secs")]
    pub max_runtime_secs: u64,

    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
}

impl FfmpegConfig {
    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}
fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}
fn default_max_concurrent() -> usize {
    streamforge_av::limiter::DEFAULT_CAPACITY
}
fn default_max_runtime_secs() -> u64 {
    streamforge_av::converter::DEFAULT_MAX_RUNTIME.as_secs()
}
fn default_audio_codec() -> String {
    streamforge_av::args::DEFAULT_AUDIO_CODEC.to_string()
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            max_concurrent: default_max_concurrent(),
            max_runtime_secs: default_max_runtime_secs(),
            audio_codec: default_audio_codec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage backend: `disk` or `s3`
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Root directory for the disk backend
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,

    // S3 settings, required when provider is `s3`.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Endpoint, e.g. `https://s3.eu-central-1.amazonaws.com` or a MinIO URL
    #[serde(default)]
    pub service_url: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
}

fn default_provider() -> String {
    "disk".to_string()
}
fn default_root_path() -> PathBuf {
    PathBuf::from("./media")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            root_path: default_root_path(),
            bucket: None,
            service_url: None,
            region: None,
            access_key: None,
            secret_key: None,
        }
    }
}
