//! Shared fixtures for integration tests.
//!
//! [`FakeTools`] lays out a temp directory with an input file, shell scripts
//! standing in for ffmpeg and ffprobe, and a config file pointing at them.
#![allow(dead_code)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// What the fake ffmpeg writes to stdout for a transcode.
pub const FAKE_MP4: &[u8] = b"ftyp-moof-mdat";
/// What the fake ffmpeg writes to the waveform path.
pub const FAKE_PNG: &[u8] = b"\x89PNG-wave";

/// ffprobe output for an AVI with one video and one audio stream.
pub const PROBE_WITH_AUDIO: &str = r#"{
  "streams": [
    {"index": 0, "codec_type": "video", "codec_name": "mpeg4", "width": 640, "height": 480, "r_frame_rate": "25/1"},
    {"index": 1, "codec_type": "audio", "codec_name": "mp3", "channels": 2, "sample_rate": "44100"}
  ],
  "format": {"format_name": "avi", "duration": "61.500000", "size": "16"}
}"#;

/// ffprobe output for a video-only file.
pub const PROBE_VIDEO_ONLY: &str = r#"{
  "streams": [
    {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720}
  ],
  "format": {"format_name": "avi", "duration": "10.0"}
}"#;

/// Writes [`FAKE_PNG`] to the last argument when a waveform is requested and
/// [`FAKE_MP4`] to stdout when streaming MP4.
const FAKE_FFMPEG: &str = r#"last=""
for a in "$@"; do last="$a"; done
case "$*" in
  *showwavespic*) printf '\211PNG-wave' > "$last" ;;
esac
case "$*" in
  *" -f mp4 -"*) printf 'ftyp-moof-mdat' ;;
esac
"#;

pub struct FakeTools {
    dir: TempDir,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::with_probe_output(PROBE_WITH_AUDIO)
    }

    pub fn with_probe_output(json: &str) -> Self {
        Self::with_scripts(FAKE_FFMPEG, &format!("cat <<'EOF'\n{json}\nEOF\n"))
    }

    pub fn with_scripts(ffmpeg: &str, ffprobe: &str) -> Self {
        let tools = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        std::fs::write(tools.input(), b"RIFF....AVI LIST").unwrap();
        write_script(&tools.ffmpeg(), ffmpeg);
        write_script(&tools.ffprobe(), ffprobe);
        std::fs::write(
            tools.config(),
            format!(
                "[ffmpeg]\npath = {:?}\nffprobe_path = {:?}\nmax_concurrent = 2\n\n[storage]\nroot_path = {:?}\n",
                tools.ffmpeg().to_str().unwrap(),
                tools.ffprobe().to_str().unwrap(),
                tools.storage_root().to_str().unwrap(),
            ),
        )
        .unwrap();
        tools
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn input(&self) -> PathBuf {
        self.dir().join("input.avi")
    }

    pub fn ffmpeg(&self) -> PathBuf {
        self.dir().join("ffmpeg")
    }

    pub fn ffprobe(&self) -> PathBuf {
        self.dir().join("ffprobe")
    }

    pub fn config(&self) -> PathBuf {
        self.dir().join("config.toml")
    }

    pub fn storage_root(&self) -> PathBuf {
        self.dir().join("media")
    }
}

fn write_script(path: &Path, body: &str) {
    {
        let mut file = std::fs::File::create(path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.sync_all().unwrap();
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
