//! External tool detection and management.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Information about an external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Resolve a configured tool location to an executable path.
///
/// A bare name (`ffmpeg`) is looked up in `PATH`; anything containing a
/// directory component must exist as given.
///
/// # Errors
///
/// Returns [`Error::ToolNotFound`] if the tool cannot be located.
pub fn resolve_tool(configured: &Path) -> Result<PathBuf> {
    let name = configured.to_string_lossy().to_string();
    if name.is_empty() {
        return Err(Error::tool_not_found("<empty path>"));
    }

    let is_bare_name = configured.components().count() == 1 && !configured.is_absolute();
    if is_bare_name {
        return which::which(configured).map_err(|_| Error::tool_not_found(name));
    }

    if configured.is_file() {
        Ok(configured.to_path_buf())
    } else {
        Err(Error::tool_not_found(name))
    }
}

/// Check if a tool is available and get its information.
///
/// ffmpeg-family tools take `-version` rather than `--version`.
///
/// # Example
///
/// ```no_run
/// use streamforge_av::check_tool;
/// use std::path::Path;
///
/// let info = check_tool("ffprobe", Path::new("ffprobe"));
/// if info.available {
///     println!("ffprobe version: {:?}", info.version);
/// }
/// ```
pub fn check_tool(name: &str, configured: &Path) -> ToolInfo {
    let Ok(path) = resolve_tool(configured) else {
        return ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        };
    };

    ToolInfo {
        name: name.to_string(),
        available: true,
        version: detect_version(&path),
        path: Some(path),
    }
}

/// Check ffmpeg and ffprobe at their configured locations.
pub fn check_tools(ffmpeg: &Path, ffprobe: &Path) -> Vec<ToolInfo> {
    vec![check_tool("ffmpeg", ffmpeg), check_tool("ffprobe", ffprobe)]
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = Command::new(path).arg("-version").output().ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
