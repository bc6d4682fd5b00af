use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::http::DEFAULT_USER_AGENT;
use crate::fetch::{FetchPolicy, SourceSpec, DEFAULT_MAX_RESPONSE_BYTES};
use crate::merge::{CalendarHeader, DEFAULT_PRODID};
use crate::translate::default_dictionary;

// Environment overrides, applied after the config file is read
const ENV_SYNC_INTERVAL: &str = "ICSFUSION_SYNC_INTERVAL";
const ENV_REQUEST_TIMEOUT: &str = "ICSFUSION_REQUEST_TIMEOUT";
const ENV_MAX_RETRIES: &str = "ICSFUSION_MAX_RETRIES";
const ENV_DATA_DIR: &str = "ICSFUSION_DATA_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub origin: String,
    pub url: String,
    /// Events from the primary source win merge conflicts
    #[serde(default)]
    pub primary: bool,
    /// Display label prefixed to translated summaries, e.g. "Airbnb"
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_response_bytes: usize,
    pub resolve_hosts: bool,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 1000,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            resolve_hosts: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_minutes: u64,
    pub translate: bool,
    pub calendar_name: Option<String>,
    pub prodid: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            translate: true,
            calendar_name: None,
            prodid: DEFAULT_PRODID.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub merged_file: String,
    pub translated_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            merged_file: "calendar.ics".to_string(),
            translated_file: "calendar-fr.ics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub phrases: BTreeMap<String, String>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self { phrases: default_dictionary() }
    }
}

impl Config {
    /// Load from `path`, or from the platform config dir when `None`.
    ///
    /// A missing file is created with defaults. Environment overrides are
    /// applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => get_config_path()?,
        };

        let mut config = if config_path.exists() {
            debug!("Reading config from {}", config_path.display());
            let content = fs::read_to_string(&config_path).context("Failed to read config file")?;
            Self::from_toml(&content)?
        } else {
            info!("No config at {}, writing defaults", config_path.display());
            let default_config = Config::default();
            default_config.save_to(&config_path)?;
            default_config
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(minutes) = env_parse::<u64>(ENV_SYNC_INTERVAL)? {
            self.sync.interval_minutes = minutes;
        }
        if let Some(secs) = env_parse::<u64>(ENV_REQUEST_TIMEOUT)? {
            self.fetch.timeout_secs = secs;
        }
        if let Some(retries) = env_parse::<u32>(ENV_MAX_RETRIES)? {
            self.fetch.max_retries = retries;
        }
        if let Ok(dir) = env::var(ENV_DATA_DIR) {
            if !dir.trim().is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.origin.trim().is_empty() {
                return Err(anyhow!("Source with URL '{}' has an empty origin", source.url));
            }
            if !seen.insert(source.origin.as_str()) {
                return Err(anyhow!("Duplicate source origin '{}'", source.origin));
            }
        }
        if self.sources.iter().filter(|s| s.primary).count() > 1 {
            return Err(anyhow!("Only one source may be marked primary"));
        }
        if self.sync.interval_minutes == 0 {
            return Err(anyhow!("sync.interval_minutes must be at least 1"));
        }
        Ok(())
    }

    /// Origin whose events win conflicts: the flagged source, else the first one.
    pub fn primary_origin(&self) -> Option<&str> {
        self.sources
            .iter()
            .find(|s| s.primary)
            .or_else(|| self.sources.first())
            .map(|s| s.origin.as_str())
    }

    pub fn source_specs(&self) -> Vec<SourceSpec> {
        self.sources.iter().map(|s| SourceSpec::new(s.origin.clone(), s.url.clone())).collect()
    }

    pub fn origin_labels(&self) -> HashMap<String, String> {
        self.sources
            .iter()
            .filter_map(|s| s.label.clone().map(|label| (s.origin.clone(), label)))
            .collect()
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_secs(self.fetch.timeout_secs),
            max_retries: self.fetch.max_retries,
            base_delay: Duration::from_millis(self.fetch.base_delay_ms),
            max_response_bytes: self.fetch.max_response_bytes,
            resolve_hosts: self.fetch.resolve_hosts,
        }
    }

    pub fn calendar_header(&self) -> CalendarHeader {
        CalendarHeader { prodid: self.sync.prodid.clone(), calendar_name: self.sync.calendar_name.clone() }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_minutes * 60)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number, got '{}'", name, value)),
        _ => Ok(None),
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "icsfusion", "icsfusion")
        .context("Failed to determine config directory")?;

    Ok(proj_dirs.config_dir().join("config.toml"))
}
