use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

mod env;
mod types;

pub use types::Settings;

const DEFAULT_CONFIG_PATH: &str = "/etc/wg-admin/wg-admin.toml";

/// Defaults, then the optional TOML file, then `WG_*` environment overrides.
pub fn load() -> Result<Settings> {
    let path = config_path();
    let mut cfg = load_config_file(&path)?;
    env::apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    cfg.validate()
        .with_context(|| format!("validating settings from {path:?} and environment"))?;
    tracing::debug!(?cfg, "settings loaded");
    Ok(cfg)
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("WG_CONFIG")
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn load_config_file(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let text = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    let cfg: Settings = toml::from_str(&text).with_context(|| format!("parsing {path:?}"))?;
    Ok(cfg)
}
