//! Configuration and install-target derivation shared by the chromedriver crates.

mod config;
mod target;

use std::path::PathBuf;

pub use config::*;
pub use target::*;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid chromedriver version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("unsupported host platform: {os}")]
    UnsupportedPlatform { os: String },

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: String, value: String },

    #[error("read config file {}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config file {}", path.display())]
    ParseFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
