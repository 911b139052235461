//! Configuration management for the jwkd service
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use config::ConfigError;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_KEY_ALGORITHM: &str = "PBES2-HS256+A128KW";
pub const DEFAULT_CONTENT_ALGORITHM: &str = "A128GCM";
pub const DEFAULT_CACHE_PREFIX: &str = "jwkd_cache:";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Transport encryption of listed keys
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub key_algorithm: String,
    pub content_algorithm: String,
    pub enable_payload_compression: bool,
    /// Fail at startup on unknown algorithm names instead of falling back
    pub strict_algorithms: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_algorithm: DEFAULT_KEY_ALGORITHM.to_string(),
            content_algorithm: DEFAULT_CONTENT_ALGORITHM.to_string(),
            enable_payload_compression: false,
            strict_algorithms: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Prefix the cache store adds to every key
    pub prefix: String,
    /// Entry lifetime; `None` keeps entries until purged
    pub ttl_secs: Option<u64>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_CACHE_PREFIX.to_string(),
            ttl_secs: None,
        }
    }
}

/// Key storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Directory for the sealed key snapshot; keys stay in memory when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    pub encryption: EncryptionConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub log_level: Option<String>,
    /// `json` or `console`
    pub log_format: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let encryption = EncryptionConfig {
            enabled: parse_bool(&lookup, "JWK_ENCRYPTION_ENABLED")?.unwrap_or(false),
            key_algorithm: var("JWK_ENCRYPTION_KEY_ALGORITHM")
                .unwrap_or_else(|| DEFAULT_KEY_ALGORITHM.to_string()),
            content_algorithm: var("JWK_ENCRYPTION_CONTENT_ALGORITHM")
                .unwrap_or_else(|| DEFAULT_CONTENT_ALGORITHM.to_string()),
            enable_payload_compression: parse_bool(&lookup, "JWK_ENCRYPTION_ENABLE_PAYLOAD_COMPRESSION")?
                .unwrap_or(false),
            strict_algorithms: parse_bool(&lookup, "JWK_ENCRYPTION_STRICT_ALGORITHMS")?
                .unwrap_or(false),
        };

        let cache = CacheConfig {
            prefix: lookup("CACHE_PREFIX").unwrap_or_else(|| DEFAULT_CACHE_PREFIX.to_string()),
            ttl_secs: parse_number::<u64, _>(&lookup, "CACHE_TTL_SECS")?.filter(|secs| *secs > 0),
        };

        Ok(Self {
            encryption,
            cache,
            storage: StorageConfig {
                path: var("KEY_STORAGE_PATH").map(PathBuf::from),
            },
            server: ServerConfig {
                port: parse_number(&lookup, "HTTP_PORT")?.unwrap_or(DEFAULT_HTTP_PORT),
            },
            log_level: Some(var("LOG_LEVEL").unwrap_or_else(|| "info".to_string())),
            log_format: var("LOG_FORMAT"),
        })
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Get log format, defaulting to "json"
    pub fn log_format(&self) -> &str {
        self.log_format.as_deref().unwrap_or("json")
    }
}

fn parse_bool<F>(lookup: &F, name: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => Err(ConfigError::Message(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

fn parse_number<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::Message(format!("{} is invalid: {}", name, e))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[]).unwrap();
        assert!(!config.encryption.enabled);
        assert_eq!(config.encryption.key_algorithm, "PBES2-HS256+A128KW");
        assert_eq!(config.encryption.content_algorithm, "A128GCM");
        assert_eq!(config.cache.prefix, "jwkd_cache:");
        assert_eq!(config.cache.ttl(), None);
        assert_eq!(config.storage.path, None);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.log_format(), "json");
    }

    #[test]
    fn test_config_from_variables() {
        let config = load(&[
            ("JWK_ENCRYPTION_ENABLED", "true"),
            ("JWK_ENCRYPTION_KEY_ALGORITHM", "A256KW"),
            ("JWK_ENCRYPTION_CONTENT_ALGORITHM", "A256GCM"),
            ("JWK_ENCRYPTION_ENABLE_PAYLOAD_COMPRESSION", "1"),
            ("CACHE_TTL_SECS", "600"),
            ("KEY_STORAGE_PATH", "/var/lib/jwkd"),
            ("HTTP_PORT", "9000"),
            ("LOG_FORMAT", "console"),
        ])
        .unwrap();

        assert!(config.encryption.enabled);
        assert!(config.encryption.enable_payload_compression);
        assert!(!config.encryption.strict_algorithms);
        assert_eq!(config.encryption.key_algorithm, "A256KW");
        assert_eq!(config.cache.ttl(), Some(Duration::from_secs(600)));
        assert_eq!(config.storage.path, Some(PathBuf::from("/var/lib/jwkd")));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.log_format(), "console");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("JWK_ENCRYPTION_ENABLED", "maybe")]).is_err());
        assert!(load(&[("HTTP_PORT", "http")]).is_err());
        assert!(load(&[("HTTP_PORT", "70000")]).is_err());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = load(&[("JWK_ENCRYPTION_ENABLED", ""), ("CACHE_TTL_SECS", "0")]).unwrap();
        assert!(!config.encryption.enabled);
        assert_eq!(config.cache.ttl(), None);
    }
}
