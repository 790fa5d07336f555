//! TOML persistence for [`AgentConfig`].
//!
//! The default location follows platform conventions:
//! - Windows:  `%APPDATA%\Zonelink\config.toml`
//! - Linux:    `~/.config/zonelink/config.toml`
//! - macOS:    `~/Library/Application Support/Zonelink/config.toml`
//!
//! A missing file is not an error; the agent runs on built-in defaults.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::domain::{AgentConfig, InvalidConfig};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The TOML parsed but holds an unusable value.
    #[error("config at {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: InvalidConfig,
    },

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the agent configuration from `explicit`, or from the default
/// location when `None`.
///
/// A missing file yields [`AgentConfig::default()`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if a value fails validation.
pub fn load_config(explicit: Option<&Path>) -> Result<AgentConfig, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    match read_config(&path) {
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file; using defaults");
            Ok(AgentConfig::default())
        }
        other => other,
    }
}

/// Reads, parses and validates one config file.
pub fn read_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: AgentConfig = toml::from_str(&content)?;
    config.validate().map_err(|source| ConfigError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AgentConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `Zonelink`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Zonelink"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("zonelink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Zonelink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("zonelink-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_save_then_load_explicit_path() {
        // Arrange
        let dir = scratch_dir("roundtrip");
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AgentConfig::default();
        cfg.log_level = "debug".to_string();
        cfg.session.trust_anchors = vec![PathBuf::from("/etc/zonelink/root.pem")];

        // Act
        save_config(&cfg, &path).unwrap();
        let loaded = load_config(Some(&path)).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = scratch_dir("missing");
        let cfg = load_config(Some(&dir.join("absent.toml"))).unwrap();
        assert_eq!(cfg, AgentConfig::default());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_read_config_reports_missing_path() {
        let dir = scratch_dir("absent");
        let path = dir.join("absent.toml");
        let err = read_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { path: ref p, .. } if *p == path));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let dir = scratch_dir("malformed");
        let path = dir.join("config.toml");
        std::fs::write(&path, "[discovery\nport = ").unwrap();

        let err = read_config(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_wrong_field_type_is_a_parse_error() {
        let dir = scratch_dir("badtype");
        let path = dir.join("config.toml");
        std::fs::write(&path, "[session]\napi_key = \"not-a-uuid\"\n").unwrap();

        assert!(matches!(read_config(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_zero_expiry_interval_is_rejected_on_load() {
        // Arrange
        let dir = scratch_dir("zero-interval");
        let path = dir.join("config.toml");
        std::fs::write(&path, "[discovery]\nexpiry_interval_secs = 0\n").unwrap();

        // Act
        let err = load_config(Some(&path)).unwrap_err();

        // Assert
        assert!(matches!(
            err,
            ConfigError::Invalid { ref source, .. } if source.field == "discovery.expiry_interval_secs"
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_config_file_path_ends_with_zonelink_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("zonelink/config.toml"));
        }
    }
}
