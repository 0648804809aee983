mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    config.storage.root_path = expand_path(&config.storage.root_path);

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./streamforge.toml",
        "~/.config/streamforge/config.toml",
        "/etc/streamforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn expand_path(path: &Path) -> std::path::PathBuf {
    let raw = path.to_string_lossy();
    std::path::PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.ffmpeg.max_concurrent == 0 {
        anyhow::bail!("ffmpeg.max_concurrent must be at least 1");
    }

    if config.ffmpeg.max_runtime_secs == 0 {
        anyhow::bail!("ffmpeg.max_runtime_secs must be at least 1");
    }

    if config.ffmpeg.audio_codec.trim().is_empty() {
        anyhow::bail!("ffmpeg.audio_codec cannot be empty");
    }

    if config.waveform.width == 0 || config.waveform.height == 0 {
        anyhow::bail!(
            "waveform size must be non-zero (got {}x{})",
            config.waveform.width,
            config.waveform.height
        );
    }

    let storage = &config.storage;
    match storage.provider.to_ascii_lowercase().as_str() {
        "disk" => {
            if storage.root_path.as_os_str().is_empty() {
                anyhow::bail!("storage.root_path cannot be empty");
            }
        }
        "s3" => {
            let settings = [
                ("bucket", &storage.bucket),
                ("service_url", &storage.service_url),
                ("region", &storage.region),
                ("access_key", &storage.access_key),
                ("secret_key", &storage.secret_key),
            ];
            for (name, value) in settings {
                if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                    anyhow::bail!("storage.{} is required when provider is s3", name);
                }
            }
            let url = storage.service_url.as_deref().unwrap_or_default();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("storage.service_url must be an http(s) URL (got '{}')", url);
            }
        }
        _ => anyhow::bail!(
            "Unknown storage provider '{}' (supported: disk, s3)",
            storage.provider
        ),
    }

    Ok(())
}
