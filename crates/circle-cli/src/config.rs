//! Configuration file parsing for circle.toml.

use circle_gc::CollectorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Collector settings
    #[serde(default)]
    pub collector: CollectorSection,

    /// Scene building defaults
    #[serde(default)]
    pub scene: SceneSection,
}

/// Collector configuration.
#[derive(Debug, Deserialize)]
pub struct CollectorSection {
    /// Stop each search as soon as its verdict is known
    #[serde(default = "default_true")]
    pub early_exit: bool,

    /// Clear the edges of leaked cycles
    #[serde(default = "default_true")]
    pub break_cycles: bool,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            early_exit: true,
            break_cycles: true,
        }
    }
}

impl From<&CollectorSection> for CollectorConfig {
    fn from(section: &CollectorSection) -> Self {
        CollectorConfig {
            early_exit: section.early_exit,
            break_cycles: section.break_cycles,
        }
    }
}

/// Scene configuration.
#[derive(Debug, Deserialize)]
pub struct SceneSection {
    /// Objects per cycle or chain
    #[serde(default = "default_length")]
    pub length: usize,
}

impl Default for SceneSection {
    fn default() -> Self {
        Self {
            length: default_length(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_length() -> usize {
    2
}

/// Load configuration from a file or search for default config files.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "Loaded config");
            Ok(config)
        }
        Some(path) => Err(anyhow::anyhow!("Config file {} not found", path.display())),
        None => Ok(Config::default()),
    }
}

/// Search for configuration file in the current directory and parent directories.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;

    const CONFIG_NAMES: &[&str] = &["circle.toml", ".circlerc.toml"];

    let mut dir = Some(cwd.as_path());
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}
