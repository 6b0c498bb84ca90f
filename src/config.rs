use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::{EngineOptions, RetryPolicy};

const MAX_PARALLELISM: usize = 32;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_buffer_size_kib")]
    pub buffer_size_kib: usize,
    #[serde(default = "default_min_chunk_size_kib")]
    pub min_chunk_size_kib: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Download directory; the working directory when unset.
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_verify_checksums")]
    pub verify_checksums: bool,
}

fn default_parallelism() -> usize {
    4
}
fn default_buffer_size_kib() -> usize {
    64
}
fn default_min_chunk_size_kib() -> u64 {
    1024
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_read_timeout_secs() -> u64 {
    60
}
fn default_progress_interval_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    concat!("chunkfetch/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_verify_checksums() -> bool {
    true
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            buffer_size_kib: default_buffer_size_kib(),
            min_chunk_size_kib: default_min_chunk_size_kib(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: None,
            verify_checksums: default_verify_checksums(),
        }
    }
}

impl Config {
    /// Engine settings derived from the `[download]` section.
    pub fn engine_options(&self) -> EngineOptions {
        let d = &self.download;
        EngineOptions {
            buffer_size: d.buffer_size_kib * 1024,
            min_chunk_size: d.min_chunk_size_kib * 1024,
            retry: RetryPolicy {
                max_retries: d.max_retries,
                base_delay: Duration::from_millis(d.retry_delay_ms),
            },
            connect_timeout: Duration::from_secs(d.connect_timeout_secs),
            read_timeout: Duration::from_secs(d.read_timeout_secs),
            publish_interval: Duration::from_millis(d.progress_interval_ms),
            user_agent: d.user_agent.clone(),
        }
    }

    pub fn output_directory(&self) -> PathBuf {
        self.output
            .directory
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
    }
}

pub struct ConfigManager {
    config_file: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Load the config from the platform config directory, creating a default one if missing
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("", "", "chunkfetch")
            .context("Failed to determine config directory")?;

        Self::with_path(project_dirs.config_dir().join("config.toml"))
    }

    /// Load the config from an explicit file, creating it with defaults if missing
    pub fn with_path(config_file: PathBuf) -> Result<Self> {
        if let Some(config_dir) = config_file.parent() {
            if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
                fs::create_dir_all(config_dir).with_context(|| {
                    format!("Failed to create config directory: {:?}", config_dir)
                })?;
            }
        }

        let config = if config_file.exists() {
            Self::load_config(&config_file)?
        } else {
            let default_config = Config::default();
            Self::save_config(&config_file, &default_config)?;
            default_config
        };

        Ok(Self {
            config_file,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn save(&self) -> Result<()> {
        Self::save_config(&self.config_file, &self.config)
    }

    /// Replace the current config with defaults and persist it
    pub fn reset(&mut self) -> Result<()> {
        self.config = Config::default();
        self.save()
    }

    fn load_config(config_file: &Path) -> Result<Config> {
        let content = fs::read_to_string(config_file)
            .with_context(|| format!("Failed to read config file: {:?}", config_file))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_file))
    }

    fn save_config(config_file: &Path, config: &Config) -> Result<()> {
        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(config_file, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let download = &self.config.download;

        if download.parallelism == 0 {
            anyhow::bail!("download.parallelism must be greater than 0");
        }
        if download.parallelism > MAX_PARALLELISM {
            anyhow::bail!("download.parallelism cannot exceed {}", MAX_PARALLELISM);
        }
        if download.buffer_size_kib == 0 {
            anyhow::bail!("download.buffer_size_kib must be greater than 0");
        }
        if download.connect_timeout_secs == 0 || download.read_timeout_secs == 0 {
            anyhow::bail!("download timeouts must be greater than 0");
        }
        if download.user_agent.trim().is_empty() {
            anyhow::bail!("download.user_agent cannot be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_default_config_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("config.toml");

        let manager = ConfigManager::with_path(path.clone())?;
        assert!(path.exists());
        assert_eq!(manager.config().download.parallelism, 4);
        manager.validate()?;
        Ok(())
    }

    #[test]
    fn test_partial_file_uses_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "[download]\nparallelism = 8\n")?;

        let manager = ConfigManager::with_path(path)?;
        let config = manager.config();
        assert_eq!(config.download.parallelism, 8);
        assert_eq!(config.download.max_retries, 3);
        assert!(config.output.verify_checksums);
        Ok(())
    }

    #[test]
    fn test_engine_options_conversion() {
        let config = Config::default();
        let options = config.engine_options();

        assert_eq!(options.buffer_size, 64 * 1024);
        assert_eq!(options.min_chunk_size, 1024 * 1024);
        assert_eq!(options.retry.max_retries, 3);
        assert_eq!(options.retry.base_delay, Duration::from_millis(500));
        assert!(options.user_agent.starts_with("chunkfetch/"));
    }

    #[test]
    fn test_validation_rejects_bad_values() -> Result<()> {
        let dir = TempDir::new()?;
        let mut manager = ConfigManager::with_path(dir.path().join("config.toml"))?;

        manager.config_mut().download.parallelism = 0;
        assert!(manager.validate().is_err());

        manager.config_mut().download.parallelism = 64;
        assert!(manager.validate().is_err());

        manager.reset()?;
        manager.config_mut().download.read_timeout_secs = 0;
        assert!(manager.validate().is_err());
        Ok(())
    }
}
