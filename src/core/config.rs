use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::core::constants::{REVEAL_BASE_DELAY_MS, REVEAL_JITTER_MS};
use crate::core::reveal::RevealPacing;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backend base URL (e.g. "http://localhost:8000").
    pub base_url: Option<String>,
    /// Model requested from the backend.
    pub default_model: Option<String>,
    /// User identifier sent with every request.
    pub user_id: Option<String>,
    /// Path to the figure-number → asset map (`mapa_figuras.json`).
    pub figure_map_path: Option<PathBuf>,
    /// Path to the image metadata list (`imagenes.json`).
    pub figure_assets_path: Option<PathBuf>,
    /// Base delay between revealed words, in milliseconds.
    pub reveal_base_ms: Option<u64>,
    /// Maximum random jitter on top of the base delay, in milliseconds.
    pub reveal_jitter_ms: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Config, Box<dyn std::error::Error>> {
        let config_path = Self::get_config_path();
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(config_path: &PathBuf) -> Result<Config, Box<dyn std::error::Error>> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config_path = Self::get_config_path();
        self.save_to_path(&config_path)
    }

    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    fn get_config_path() -> PathBuf {
        let proj_dirs = ProjectDirs::from("org", "permacommons", "charla")
            .expect("Failed to determine config directory");
        proj_dirs.config_dir().join("config.toml")
    }

    pub fn reveal_pacing(&self) -> RevealPacing {
        RevealPacing {
            base: std::time::Duration::from_millis(
                self.reveal_base_ms.unwrap_or(REVEAL_BASE_DELAY_MS),
            ),
            jitter: std::time::Duration::from_millis(
                self.reveal_jitter_ms.unwrap_or(REVEAL_JITTER_MS),
            ),
        }
    }
}
