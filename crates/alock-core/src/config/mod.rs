//! Configuration management with file persistence

use crate::locking::LockConfig;
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the lock directory
pub const LOCK_DIR_ENV: &str = "ALOCK_LOCK_DIR";

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "ALOCK_CONFIG_DIR";

/// Keys understood by [`Config::get`] and [`Config::set`]
pub const KEYS: [&str; 3] = ["lock.lock_dir", "lock.poll_interval_ms", "lock.timeout_secs"];

/// alock configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lock: LockSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Shared lock directory (system temp dir when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Maximum wait in seconds (wait forever when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lock_dir: None,
            poll_interval_ms: 250,
            timeout_secs: None,
        }
    }
}

impl LockSettings {
    /// Lock directory after applying an `ALOCK_LOCK_DIR` style override
    fn lock_dir_with(&self, env_override: Option<OsString>) -> PathBuf {
        env_override
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.lock_dir.clone())
            .unwrap_or_else(env::temp_dir)
    }

    fn to_lock_config(&self, env_override: Option<OsString>) -> LockConfig {
        LockConfig::default()
            .with_lock_dir(self.lock_dir_with(env_override))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_timeout(self.timeout_secs.and_then(|secs| Duration::try_from_secs_f64(secs).ok()))
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("alock")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Reset the configuration file to defaults
    pub fn reset() -> anyhow::Result<()> {
        Config::default().save()
    }

    /// All configuration keys with their current values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lock.poll_interval_ms == 0 {
            return Err(anyhow!("lock.poll_interval_ms must be greater than 0"));
        }
        if let Some(secs) = self.lock.timeout_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(anyhow!("lock.timeout_secs must be a non-negative number"));
            }
        }
        Ok(())
    }

    /// Runtime lock settings, honouring `ALOCK_LOCK_DIR`
    pub fn lock_config(&self) -> LockConfig {
        self.lock.to_lock_config(env::var_os(LOCK_DIR_ENV))
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "lock.lock_dir" => Ok(self
                .lock
                .lock_dir_with(env::var_os(LOCK_DIR_ENV))
                .display()
                .to_string()),
            "lock.poll_interval_ms" => Ok(self.lock.poll_interval_ms.to_string()),
            "lock.timeout_secs" => Ok(self
                .lock
                .timeout_secs
                .map_or_else(|| "none".to_string(), |secs| secs.to_string())),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `alock config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "lock.lock_dir" => {
                self.lock.lock_dir = match value.trim() {
                    "" | "default" => None,
                    dir => Some(PathBuf::from(dir)),
                };
            }
            "lock.poll_interval_ms" => {
                let interval: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid poll_interval_ms value: {}", value))?;
                if interval == 0 {
                    return Err(anyhow!("Poll interval must be greater than 0"));
                }
                self.lock.poll_interval_ms = interval;
            }
            "lock.timeout_secs" => {
                self.lock.timeout_secs = match value.trim() {
                    "" | "none" => None,
                    secs => {
                        let secs: f64 = secs
                            .parse()
                            .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
                        if !secs.is_finite() || secs < 0.0 {
                            return Err(anyhow!("Timeout must be a non-negative number"));
                        }
                        Some(secs)
                    }
                };
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `alock config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.lock.poll_interval_ms, 250);
        assert_eq!(config.lock.timeout_secs, None);
        assert!(config.validate().is_ok());

        let lock = config.lock.to_lock_config(None);
        assert_eq!(lock, LockConfig::default());
    }

    #[test]
    fn test_lock_dir_precedence() {
        let mut settings = LockSettings::default();
        assert_eq!(settings.lock_dir_with(None), env::temp_dir());

        settings.lock_dir = Some(PathBuf::from("/var/lock/alock"));
        assert_eq!(settings.lock_dir_with(None), PathBuf::from("/var/lock/alock"));
        assert_eq!(
            settings.lock_dir_with(Some(OsString::from("/run/alock"))),
            PathBuf::from("/run/alock")
        );
        assert_eq!(
            settings.lock_dir_with(Some(OsString::new())),
            PathBuf::from("/var/lock/alock")
        );
    }

    #[test]
    fn test_to_lock_config() {
        let settings = LockSettings {
            lock_dir: Some(PathBuf::from("/tmp/locks")),
            poll_interval_ms: 50,
            timeout_secs: Some(1.5),
        };
        let lock = settings.to_lock_config(None);
        assert_eq!(lock.lock_dir, PathBuf::from("/tmp/locks"));
        assert_eq!(lock.poll_interval, Duration::from_millis(50));
        assert_eq!(lock.timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_get_and_set() {
        let mut config = Config::default();

        config.set("lock.poll_interval_ms", "100").unwrap();
        assert_eq!(config.get("lock.poll_interval_ms").unwrap(), "100");

        config.set("lock.timeout_secs", "2.5").unwrap();
        assert_eq!(config.get("lock.timeout_secs").unwrap(), "2.5");
        config.set("lock.timeout_secs", "none").unwrap();
        assert_eq!(config.get("lock.timeout_secs").unwrap(), "none");

        config.set("lock.lock_dir", "/srv/locks").unwrap();
        assert_eq!(config.lock.lock_dir, Some(PathBuf::from("/srv/locks")));
        config.set("lock.lock_dir", "default").unwrap();
        assert_eq!(config.lock.lock_dir, None);
    }

    #[test]
    fn test_list_covers_every_key() {
        let items = Config::default().list().unwrap();
        let keys: Vec<&str> = items.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, KEYS);
        assert!(items.contains(&("lock.poll_interval_ms".to_string(), "250".to_string())));
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("lock.poll_interval_ms", "0").is_err());
        assert!(config.set("lock.poll_interval_ms", "fast").is_err());
        assert!(config.set("lock.timeout_secs", "-1").is_err());
        assert!(config.set("lock.timeout_secs", "NaN").is_err());
        assert!(config.set("lock.owner", "me").is_err());
        assert!(config.get("lock.owner").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("lock.timeout_secs", "10").unwrap();
        config.set("lock.lock_dir", "/srv/locks").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let loaded = Config::load_from(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        fs::write(&path, "[lock]\npoll_interval_ms = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        fs::write(&path, "not toml at all [").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[lock]\ntimeout_secs = 3.0\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.lock.poll_interval_ms, 250);
        assert_eq!(loaded.lock.timeout_secs, Some(3.0));
    }
}
