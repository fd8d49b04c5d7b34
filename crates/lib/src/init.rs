//! Initialize the configuration directory: create ~/.shellcast and a template config.json.
//!
//! The template lives at `crates/lib/config/config.json` and is bundled into the binary.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

static DEFAULT_CONFIG: &str = include_str!("../config/config.json");

/// Create the config directory and write the template config if none exists.
/// An existing config file is never touched. Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, DEFAULT_CONFIG)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!(
            "config already exists at {}, skipping",
            config_path.display()
        );
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("shellcast-init-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn template_parses_as_config() {
        let config: Config = serde_json::from_str(DEFAULT_CONFIG).expect("template is valid");
        assert_eq!(config.command.timeout_secs, 15);
        // Blank placeholders count as missing.
        assert!(config::resolve_settings_with(&config, |_| None).is_err());
    }

    #[test]
    fn init_writes_template_once() {
        let dir = temp_dir();
        let path = dir.join("nested").join("config.json");
        let created = init_config_dir(&path).expect("init");
        assert_eq!(created, dir.join("nested"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);

        std::fs::write(&path, "{\"command\":{\"timeoutSecs\":2}}").unwrap();
        init_config_dir(&path).expect("second init");
        assert!(std::fs::read_to_string(&path).unwrap().contains("timeoutSecs\":2"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
