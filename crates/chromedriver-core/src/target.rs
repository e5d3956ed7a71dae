use std::path::{Path, PathBuf};

use crate::ConfigError;

pub const BINARY_BASE: &str = "chromedriver";
pub const DEFAULT_VERSION: &str = "2.27";
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://chromedriver.storage.googleapis.com/";

/// Host platforms chromedriver archives are published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Mac64,
    Linux64,
    Win32,
}

impl Platform {
    pub fn current() -> Result<Self, ConfigError> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self, ConfigError> {
        match os {
            "macos" => Ok(Self::Mac64),
            "linux" => Ok(Self::Linux64),
            "windows" => Ok(Self::Win32),
            other => Err(ConfigError::UnsupportedPlatform {
                os: other.to_string(),
            }),
        }
    }

    /// Suffix used in the archive file name, e.g. `chromedriver_linux64.zip`.
    pub fn archive_tag(self) -> &'static str {
        match self {
            Self::Mac64 => "mac64",
            Self::Linux64 => "linux64",
            Self::Win32 => "win32",
        }
    }

    pub fn exe_suffix(self) -> &'static str {
        match self {
            Self::Win32 => ".exe",
            Self::Mac64 | Self::Linux64 => "",
        }
    }

    /// Name of the binary inside the published zip.
    pub fn entry_name(self) -> String {
        format!("{BINARY_BASE}{}", self.exe_suffix())
    }
}

/// Where one chromedriver version lives once installed, and where it comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    cache_dir: PathBuf,
    version: String,
    platform: Platform,
    binary_path: PathBuf,
    archive_url: String,
}

impl InstallTarget {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        version: &str,
        download_base: &str,
    ) -> Result<Self, ConfigError> {
        Self::for_platform(cache_dir, version, download_base, Platform::current()?)
    }

    pub fn for_platform(
        cache_dir: impl Into<PathBuf>,
        version: &str,
        download_base: &str,
        platform: Platform,
    ) -> Result<Self, ConfigError> {
        validate_version(version)?;

        let cache_dir = absolutize(cache_dir.into());
        let binary_path = cache_dir.join(format!(
            "{BINARY_BASE}-{version}{}",
            platform.exe_suffix()
        ));

        let base = download_base.trim_end_matches('/');
        let archive_url = format!(
            "{base}/{version}/{BINARY_BASE}_{}.zip",
            platform.archive_tag()
        );

        Ok(Self {
            cache_dir,
            version: version.to_string(),
            platform,
            binary_path,
            archive_url,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn archive_url(&self) -> &str {
        &self.archive_url
    }

    pub fn entry_name(&self) -> String {
        self.platform.entry_name()
    }
}

/// The version ends up in a file name and a URL path segment.
pub fn validate_version(version: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidVersion {
        version: version.to_string(),
        reason: reason.to_string(),
    };

    if version.trim().is_empty() {
        return Err(invalid("must be non-empty"));
    }
    if version.contains(['/', '\\']) {
        return Err(invalid("must not contain path separators"));
    }
    if version.contains("..") {
        return Err(invalid("must not contain `..`"));
    }
    if version
        .chars()
        .any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(invalid("must not contain whitespace or control characters"));
    }
    Ok(())
}

fn absolutize(p: PathBuf) -> PathBuf {
    if p.is_absolute() {
        return p;
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_target_layout() {
        let t = InstallTarget::for_platform(
            "/cache",
            "2.27",
            DEFAULT_DOWNLOAD_BASE,
            Platform::Linux64,
        )
        .unwrap();
        assert_eq!(t.binary_path(), Path::new("/cache/chromedriver-2.27"));
        assert_eq!(
            t.archive_url(),
            "https://chromedriver.storage.googleapis.com/2.27/chromedriver_linux64.zip"
        );
        assert_eq!(t.entry_name(), "chromedriver");
    }

    #[test]
    fn windows_target_uses_exe_suffix() {
        let t = InstallTarget::for_platform("/cache", "2.27", "http://mirror", Platform::Win32)
            .unwrap();
        assert_eq!(t.binary_path(), Path::new("/cache/chromedriver-2.27.exe"));
        assert_eq!(t.archive_url(), "http://mirror/2.27/chromedriver_win32.zip");
        assert_eq!(t.entry_name(), "chromedriver.exe");
    }

    #[test]
    fn mac_archive_tag() {
        let t = InstallTarget::for_platform("/c", "76.0", "http://m/", Platform::Mac64).unwrap();
        assert_eq!(t.archive_url(), "http://m/76.0/chromedriver_mac64.zip");
    }

    #[test]
    fn relative_cache_dir_is_made_absolute() {
        let t = InstallTarget::for_platform("rel", "2.27", "http://m", Platform::Linux64)
            .unwrap();
        assert!(t.cache_dir().is_absolute());
        assert!(t.binary_path().starts_with(t.cache_dir()));
    }

    #[test]
    fn rejects_unsafe_versions() {
        for bad in ["", "   ", "../2.27", "2.27/x", "a\\b", "2 27", "2.27\n"] {
            let err = validate_version(bad).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidVersion { .. }),
                "unexpected error for {bad:?}: {err}"
            );
        }
    }

    #[test]
    fn accepts_free_form_versions() {
        for ok in ["2.27", "114.0.5735.90", "latest", "2.27-beta_1"] {
            validate_version(ok).unwrap();
        }
    }

    #[test]
    fn unknown_os_is_unsupported() {
        let err = Platform::from_os("plan9").unwrap_err();
        assert!(err.to_string().contains("plan9"));
    }
}
