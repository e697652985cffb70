//! Runtime configuration.
//!
//! Values come from the environment first. The POS base URL and API key
//! fall back to the OS credential store when their variables are unset.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::logging::{self, LogConfig};
use crate::pos_client::normalize_base_url;
use crate::storage;

pub const ENV_DATABASE: &str = "POS_RECONCILER_DB";
pub const ENV_LOG_DIR: &str = "POS_RECONCILER_LOG_DIR";
pub const ENV_POS_BASE_URL: &str = "POS_BASE_URL";
pub const ENV_POS_API_KEY: &str = "POS_API_KEY";
pub const ENV_FORCE_MENU_WRITES: &str = "POS_RECONCILER_FORCE_MENU_WRITES";

const DEFAULT_DATABASE: &str = "pos-reconciler.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("POS not configured: missing {0} (set the environment variable or store it in the credential store)")]
    Missing(&'static str),

    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Connection settings for the POS API.
#[derive(Clone)]
pub struct PosConfig {
    pub base_url: String,
    api_key: Zeroizing<String>,
}

impl PosConfig {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            api_key: Zeroizing::new(api_key.trim().to_string()),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for PosConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PosConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub log: LogConfig,
    pub pos: PosConfig,
    /// Rewrite every site's menu tree even when its hash is unchanged.
    pub force_menu_writes: bool,
}

impl Config {
    /// Load from the process environment and the OS credential store.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok(), storage::get_credential)
    }

    fn resolve(
        env: impl Fn(&str) -> Option<String>,
        credential: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = var(ENV_POS_BASE_URL)
            .or_else(|| credential(storage::KEY_POS_BASE_URL))
            .ok_or(ConfigError::Missing(ENV_POS_BASE_URL))?;
        let api_key = Zeroizing::new(
            var(ENV_POS_API_KEY)
                .or_else(|| credential(storage::KEY_POS_API_KEY))
                .ok_or(ConfigError::Missing(ENV_POS_API_KEY))?,
        );

        let force_menu_writes = match var(ENV_FORCE_MENU_WRITES) {
            None => false,
            Some(value) => parse_flag(&value).ok_or(ConfigError::Invalid {
                key: ENV_FORCE_MENU_WRITES,
                value,
            })?,
        };

        Ok(Self {
            database_path: var(ENV_DATABASE)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            log: LogConfig {
                dir: var(ENV_LOG_DIR)
                    .map(PathBuf::from)
                    .unwrap_or_else(logging::default_log_dir),
                json: false,
            },
            pos: PosConfig::new(&base_url, &api_key),
            force_menu_writes,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_values_win_over_credentials() {
        let config = Config::resolve(
            lookup(&[
                (ENV_POS_BASE_URL, "pos.example.com/"),
                (ENV_POS_API_KEY, " env-key "),
                (ENV_DATABASE, "/var/lib/pos/reconciler.db"),
                (ENV_FORCE_MENU_WRITES, "yes"),
            ]),
            lookup(&[(storage::KEY_POS_API_KEY, "keyring-key")]),
        )
        .expect("config");
        assert_eq!(config.pos.base_url, "https://pos.example.com");
        assert_eq!(config.pos.api_key(), "env-key");
        assert_eq!(config.database_path, PathBuf::from("/var/lib/pos/reconciler.db"));
        assert!(config.force_menu_writes);
    }

    #[test]
    fn test_falls_back_to_credential_store() {
        let config = Config::resolve(
            lookup(&[(ENV_POS_API_KEY, "")]),
            lookup(&[
                (storage::KEY_POS_BASE_URL, "https://pos.example.com"),
                (storage::KEY_POS_API_KEY, "keyring-key"),
            ]),
        )
        .expect("config");
        assert_eq!(config.pos.api_key(), "keyring-key");
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE));
        assert!(!config.force_menu_writes);
    }

    #[test]
    fn test_missing_and_invalid_values() {
        let err = Config::resolve(lookup(&[(ENV_POS_BASE_URL, "pos")]), lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENV_POS_API_KEY)));

        let err = Config::resolve(
            lookup(&[
                (ENV_POS_BASE_URL, "pos"),
                (ENV_POS_API_KEY, "k"),
                (ENV_FORCE_MENU_WRITES, "sometimes"),
            ]),
            lookup(&[]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_FORCE_MENU_WRITES, .. }));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let pos = PosConfig::new("pos", "super-secret");
        assert!(!format!("{pos:?}").contains("super-secret"));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var(ENV_POS_BASE_URL, "localhost:8080");
        std::env::set_var(ENV_POS_API_KEY, "from-env");
        std::env::set_var(ENV_LOG_DIR, "/tmp/pos-reconciler-test-logs");

        let config = Config::from_env().expect("config");
        assert_eq!(config.pos.base_url, "http://localhost:8080");
        assert_eq!(config.pos.api_key(), "from-env");
        assert_eq!(config.log.dir, PathBuf::from("/tmp/pos-reconciler-test-logs"));

        std::env::remove_var(ENV_POS_BASE_URL);
        std::env::remove_var(ENV_POS_API_KEY);
        std::env::remove_var(ENV_LOG_DIR);
    }
}
