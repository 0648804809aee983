//! ffmpeg argument construction for the streaming transcode.
//!
//! The transcode keeps the first video stream as is, re-encodes audio to a
//! lossless codec and writes fragmented MP4 to stdout so the result can be
//! consumed while ffmpeg is still running. An optional second output renders
//! the audio track as a single waveform PNG.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Movie flags that make the MP4 playable before it is finalized.
pub const FRAGMENTED_MOVFLAGS: &str = "frag_keyframe+empty_moov+separate_moof+default_base_moof";

/// Default lossless audio codec.
pub const DEFAULT_AUDIO_CODEC: &str = "flac";

/// Appearance of the rendered waveform image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformStyle {
    pub width: u32,
    pub height: u32,
    pub color: String,
    /// Amplitude scale passed to `showwavespic` (`lin`, `log`, `sqrt`, `cbrt`).
    pub scale: String,
}

impl Default for WaveformStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 300,
            color: "blue".into(),
            scale: "sqrt".into(),
        }
    }
}

impl WaveformStyle {
    /// The `-filter_complex` graph that renders the first audio stream to `[wave]`.
    pub fn filter_graph(&self) -> String {
        format!(
            "[0:a]showwavespic=s={}x{}:colors={}:scale={}[wave]",
            self.width, self.height, self.color, self.scale
        )
    }
}

/// Builder for the streaming transcode command line.
#[derive(Debug, Clone)]
pub struct TranscodeArgs {
    audio_codec: String,
    waveform_style: WaveformStyle,
}

impl Default for TranscodeArgs {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIO_CODEC)
    }
}

impl TranscodeArgs {
    pub fn new(audio_codec: impl Into<String>) -> Self {
        Self {
            audio_codec: audio_codec.into(),
            waveform_style: WaveformStyle::default(),
        }
    }

    pub fn waveform_style(mut self, style: WaveformStyle) -> Self {
        self.waveform_style = style;
        self
    }

    /// Build the ordered argument list (without the program name).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `input` or a supplied `waveform`
    /// path is empty, or if the audio codec is blank.
    pub fn build(&self, input: &Path, waveform: Option<&Path>) -> Result<Vec<String>> {
        let input = non_empty(input, "input path")?;
        if self.audio_codec.trim().is_empty() {
            return Err(Error::InvalidInput("audio codec is empty".into()));
        }

        let mut args: Vec<String> = vec!["-i".into(), input];
        args.extend(
            ["-map", "0:v", "-map", "0:a", "-c:v", "copy", "-c:a"]
                .into_iter()
                .map(String::from),
        );
        args.push(self.audio_codec.clone());
        args.extend(
            ["-movflags", FRAGMENTED_MOVFLAGS, "-f", "mp4", "-"]
                .into_iter()
                .map(String::from),
        );

        if let Some(waveform) = waveform {
            let waveform = non_empty(waveform, "waveform path")?;
            args.push("-filter_complex".into());
            args.push(self.waveform_style.filter_graph());
            args.extend(
                ["-map", "[wave]", "-frames:v", "1", "-update", "1", "-y"]
                    .into_iter()
                    .map(String::from),
            );
            args.push(waveform);
        }

        Ok(args)
    }
}

/// Arguments for rendering only the waveform image of `input` to `output`.
pub fn waveform_args(style: &WaveformStyle, input: &Path, output: &Path) -> Result<Vec<String>> {
    let input = non_empty(input, "input path")?;
    let output = non_empty(output, "waveform path")?;
    let mut args: Vec<String> = vec!["-i".into(), input, "-filter_complex".into()];
    args.push(style.filter_graph());
    args.extend(
        ["-map", "[wave]", "-f", "image2", "-frames:v", "1", "-y"]
            .into_iter()
            .map(String::from),
    );
    args.push(output);
    Ok(args)
}

fn non_empty(path: &Path, what: &str) -> Result<String> {
    let s = path.to_string_lossy();
    if s.is_empty() {
        return Err(Error::InvalidInput(format!("{what} is empty")));
    }
    Ok(s.into_owned())
}
