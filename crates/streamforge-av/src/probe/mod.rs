//! Media file probing via the ffprobe CLI.

mod ffprobe;
mod types;

pub use ffprobe::probe_with_ffprobe;
pub use types::*;
