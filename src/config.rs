use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "BOOKDECK";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub browse: BrowseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_user_agent() -> String {
    "bookdeck/0.1 (+https://github.com/bookdeck/bookdeck)".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowseConfig {
    #[serde(default = "default_section_pacing", with = "humantime_serde")]
    pub section_pacing: Duration,
    #[serde(default = "default_section_limit")]
    pub section_limit: usize,
    #[serde(default = "default_search_debounce", with = "humantime_serde")]
    pub search_debounce: Duration,
    #[serde(default = "default_min_query_len")]
    pub min_query_len: usize,
    #[serde(default = "default_surface_preview")]
    pub surface_preview: bool,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            section_pacing: default_section_pacing(),
            section_limit: default_section_limit(),
            search_debounce: default_search_debounce(),
            min_query_len: default_min_query_len(),
            surface_preview: default_surface_preview(),
        }
    }
}

fn default_section_pacing() -> Duration {
    Duration::from_millis(250)
}

fn default_section_limit() -> usize {
    12
}

fn default_search_debounce() -> Duration {
    Duration::from_millis(500)
}

fn default_min_query_len() -> usize {
    2
}

fn default_surface_preview() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "catalog.base_url" => cfg.catalog.base_url = value,
        "catalog.user_agent" => cfg.catalog.user_agent = value,
        "catalog.request_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.catalog.request_timeout = duration;
            }
        }
        "browse.section_pacing" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.browse.section_pacing = duration;
            }
        }
        "browse.section_limit" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.browse.section_limit = parsed;
            }
        }
        "browse.search_debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.browse.search_debounce = duration;
            }
        }
        "browse.min_query_len" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.browse.min_query_len = parsed;
            }
        }
        "browse.surface_preview" => {
            cfg.browse.surface_preview = matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bookdeck").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/bookdeck.yaml")),
            env_prefix: Some("BOOKDECK_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.catalog.base_url, default_base_url());
        assert_eq!(cfg.browse.section_pacing, Duration::from_millis(250));
        assert_eq!(cfg.browse.search_debounce, Duration::from_millis(500));
        assert!(cfg.browse.surface_preview);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "catalog:\n  base_url: https://catalog.internal\nbrowse:\n  section_pacing: 300ms\n  surface_preview: false\n",
        )
        .unwrap();

        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("BOOKDECK_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.catalog.base_url, "https://catalog.internal");
        assert_eq!(cfg.browse.section_pacing, Duration::from_millis(300));
        assert!(!cfg.browse.surface_preview);
        assert_eq!(cfg.browse.min_query_len, 2);
    }

    #[test]
    fn env_overrides() {
        env::set_var("BOOKDECK_TEST_ENV_BROWSE__SEARCH_DEBOUNCE", "750ms");
        env::set_var("BOOKDECK_TEST_ENV_BROWSE__SURFACE_PREVIEW", "false");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/bookdeck.yaml")),
            env_prefix: Some("BOOKDECK_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.browse.search_debounce, Duration::from_millis(750));
        assert!(!cfg.browse.surface_preview);
        env::remove_var("BOOKDECK_TEST_ENV_BROWSE__SEARCH_DEBOUNCE");
        env::remove_var("BOOKDECK_TEST_ENV_BROWSE__SURFACE_PREVIEW");
    }
}
