//! Settings file stored as TOML in the user config directory

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mixdown_core::EngineConfig;

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mixdown")
        .join("config.toml")
}

/// Read settings from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(EngineConfig::default()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let config: EngineConfig = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    config.validate().with_context(|| format!("invalid settings in {}", path.display()))?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = toml::to_string_pretty(config).context("serializing settings")?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}
