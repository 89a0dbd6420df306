//! Cache configuration, read once from the environment at startup

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

pub const ENV_SECRET: &str = "ACADEMY_CACHE_SECRET";
pub const ENV_SALT: &str = "ACADEMY_CACHE_SALT";
pub const ENV_PATH: &str = "ACADEMY_CACHE_PATH";
pub const ENV_EXPIRY_SECS: &str = "ACADEMY_CACHE_EXPIRY_SECS";
pub const ENV_ROTATION_SECS: &str = "ACADEMY_CACHE_ROTATION_SECS";

pub const DEFAULT_SALT: &str = "academy-cache.v1";
pub const DEFAULT_PATH: &str = "cache.dat";
pub const DEFAULT_EXPIRY_SECS: u64 = 60 * 60;
pub const DEFAULT_ROTATION_SECS: u64 = 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} is required but missing")]
    MissingVar(&'static str),

    #[error("environment variable {name} is invalid: {reason}")]
    InvalidVar { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub secret: SecretString,
    pub salt: String,
    pub cache_path: PathBuf,
    pub expiry_interval: Duration,
    pub rotation_interval: Duration,
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let secret = get(ENV_SECRET).ok_or(ConfigError::MissingVar(ENV_SECRET))?;

        Ok(Self {
            secret: SecretString::new(secret),
            salt: get(ENV_SALT).unwrap_or_else(|| DEFAULT_SALT.to_string()),
            cache_path: get(ENV_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PATH)),
            expiry_interval: interval(ENV_EXPIRY_SECS, get(ENV_EXPIRY_SECS), DEFAULT_EXPIRY_SECS)?,
            rotation_interval: interval(
                ENV_ROTATION_SECS,
                get(ENV_ROTATION_SECS),
                DEFAULT_ROTATION_SECS,
            )?,
        })
    }
}

fn interval(name: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let secs = match raw {
        None => default,
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidVar {
            name,
            reason: e.to_string(),
        })?,
    };
    if secs == 0 {
        return Err(ConfigError::InvalidVar {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_apply() {
        let config = CacheConfig::from_lookup(lookup(&[(ENV_SECRET, "hunter2")])).unwrap();

        assert_eq!(config.secret.expose_secret(), "hunter2");
        assert_eq!(config.salt, DEFAULT_SALT);
        assert_eq!(config.cache_path, PathBuf::from(DEFAULT_PATH));
        assert_eq!(config.expiry_interval, Duration::from_secs(3600));
        assert_eq!(config.rotation_interval, Duration::from_secs(86400));
    }

    #[test]
    fn test_overrides() {
        let config = CacheConfig::from_lookup(lookup(&[
            (ENV_SECRET, "hunter2"),
            (ENV_SALT, "tenant-42"),
            (ENV_PATH, "/var/lib/academy/cache.dat"),
            (ENV_EXPIRY_SECS, "90"),
            (ENV_ROTATION_SECS, " 600 "),
        ]))
        .unwrap();

        assert_eq!(config.salt, "tenant-42");
        assert_eq!(config.cache_path, PathBuf::from("/var/lib/academy/cache.dat"));
        assert_eq!(config.expiry_interval, Duration::from_secs(90));
        assert_eq!(config.rotation_interval, Duration::from_secs(600));
    }

    #[test]
    fn test_missing_secret() {
        let err = CacheConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ENV_SECRET)));

        let err = CacheConfig::from_lookup(lookup(&[(ENV_SECRET, "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ENV_SECRET)));
    }

    #[test]
    fn test_bad_intervals() {
        let err = CacheConfig::from_lookup(lookup(&[(ENV_SECRET, "x"), (ENV_EXPIRY_SECS, "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: ENV_EXPIRY_SECS, .. }));

        let err =
            CacheConfig::from_lookup(lookup(&[(ENV_SECRET, "x"), (ENV_ROTATION_SECS, "daily")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: ENV_ROTATION_SECS, .. }));
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = CacheConfig::from_lookup(lookup(&[(ENV_SECRET, "hunter2")])).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
