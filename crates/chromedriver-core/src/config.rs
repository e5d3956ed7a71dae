use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{ConfigError, InstallTarget, target};

pub const ENV_CONFIG: &str = "CHROMEDRIVER_CONFIG";
pub const ENV_VERSION: &str = "CHROMEDRIVER_VERSION";
pub const ENV_CACHE_DIR: &str = "CHROMEDRIVER_CACHE_DIR";
pub const ENV_VERBOSE: &str = "CHROMEDRIVER_VERBOSE";
pub const ENV_PORT: &str = "CHROMEDRIVER_PORT";
pub const ENV_DOWNLOAD_BASE: &str = "CHROMEDRIVER_DOWNLOAD_BASE";
pub const ENV_SETTLE_MS: &str = "CHROMEDRIVER_SETTLE_MS";
pub const ENV_PROBE_TIMEOUT_MS: &str = "CHROMEDRIVER_PROBE_TIMEOUT_MS";

const DEFAULT_SETTLE_MS: u64 = 500;

/// Resolved configuration for installing and launching chromedriver.
///
/// Every key is optional in TOML; missing keys fall back to [`Config::default`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: String,
    pub cache_dir: PathBuf,
    pub verbose: bool,
    /// 0 means "ask the port allocator".
    pub port: u16,
    pub download_base: String,
    pub settle_ms: u64,
    /// When set, readiness is decided by polling the port instead of sleeping.
    pub probe_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: target::DEFAULT_VERSION.to_string(),
            cache_dir: default_cache_dir(),
            verbose: false,
            port: 0,
            download_base: target::DEFAULT_DOWNLOAD_BASE.to_string(),
            settle_ms: DEFAULT_SETTLE_MS,
            probe_timeout_ms: None,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".chromedriver")
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid_env(name, raw)),
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| invalid_env(name, raw))
}

fn invalid_env(name: &str, raw: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        name: name.to_string(),
        value: raw.to_string(),
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults with `CHROMEDRIVER_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Optional TOML file named by `CHROMEDRIVER_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var_os(ENV_CONFIG) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        base.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary key lookup (the process environment in practice).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_VERSION) {
            self.version = v.trim().to_string();
        }
        if let Some(v) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_VERBOSE) {
            self.verbose = parse_bool(ENV_VERBOSE, &v)?;
        }
        if let Some(v) = lookup(ENV_PORT) {
            self.port = parse_num(ENV_PORT, &v)?;
        }
        if let Some(v) = lookup(ENV_DOWNLOAD_BASE).filter(|v| !v.trim().is_empty()) {
            self.download_base = v.trim().to_string();
        }
        if let Some(v) = lookup(ENV_SETTLE_MS) {
            self.settle_ms = parse_num(ENV_SETTLE_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_PROBE_TIMEOUT_MS) {
            self.probe_timeout_ms = if v.trim().is_empty() {
                None
            } else {
                Some(parse_num(ENV_PROBE_TIMEOUT_MS, &v)?)
            };
        }
        Ok(self)
    }

    pub fn install_target(&self) -> Result<InstallTarget, ConfigError> {
        InstallTarget::new(&self.cache_dir, &self.version, &self.download_base)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_upstream_flags() {
        let c = Config::default();
        assert_eq!(c.version, "2.27");
        assert_eq!(c.port, 0);
        assert!(!c.verbose);
        assert_eq!(c.settle_interval(), Duration::from_millis(500));
        assert!(c.probe_timeout().is_none());
        assert!(c.cache_dir.ends_with(".chromedriver"));
    }

    #[test]
    fn env_overrides_apply() {
        let c = Config::default()
            .with_overrides(lookup(&[
                (ENV_VERSION, " 76.0.3809.68 "),
                (ENV_CACHE_DIR, "/tmp/cd"),
                (ENV_VERBOSE, "yes"),
                (ENV_PORT, "9999"),
                (ENV_DOWNLOAD_BASE, "http://mirror.local/"),
                (ENV_SETTLE_MS, "50"),
                (ENV_PROBE_TIMEOUT_MS, "3000"),
            ]))
            .unwrap();
        assert_eq!(c.version, "76.0.3809.68");
        assert_eq!(c.cache_dir, PathBuf::from("/tmp/cd"));
        assert!(c.verbose);
        assert_eq!(c.port, 9999);
        assert_eq!(c.download_base, "http://mirror.local/");
        assert_eq!(c.settle_ms, 50);
        assert_eq!(c.probe_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn malformed_port_is_rejected() {
        let err = Config::default()
            .with_overrides(lookup(&[(ENV_PORT, "70000")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidEnv { name, value } => {
                assert_eq!(name, ENV_PORT);
                assert_eq!(value, "70000");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_bool_is_rejected() {
        let err = Config::default()
            .with_overrides(lookup(&[(ENV_VERBOSE, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn toml_keys_are_optional() {
        let c = Config::from_toml_str("version = \"2.30\"\nport = 4444\n").unwrap();
        assert_eq!(c.version, "2.30");
        assert_eq!(c.port, 4444);
        assert_eq!(c.settle_ms, 500);
    }

    #[test]
    fn toml_rejects_unknown_keys() {
        assert!(Config::from_toml_str("versoin = \"2.30\"").is_err());
    }

    #[test]
    fn install_target_uses_config() {
        let c = Config {
            cache_dir: PathBuf::from("/var/cache/cd"),
            ..Config::default()
        };
        let t = c.install_target().unwrap();
        assert!(t.binary_path().starts_with("/var/cache/cd"));
        assert!(t.archive_url().contains("/2.27/"));
    }
}
