//! Config file discovery and loading.
//!
//! Runs before tracing is installed (the log level comes from the file), so
//! the outcome is returned as a [`ConfigSource`] and logged afterwards.

use peerchat_types::{ChatConfig, ConfigError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where the active configuration came from.
#[derive(Debug)]
pub enum ConfigSource {
    /// Parsed from this file.
    File(PathBuf),
    /// No file at this path; defaults in use.
    Missing(PathBuf),
    /// The file exists but could not be used; defaults in use.
    Fallback { path: PathBuf, error: ConfigError },
}

impl ConfigSource {
    /// Report how the configuration was obtained.
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => {
                info!(path = %path.display(), "Loaded configuration");
            }
            ConfigSource::Missing(path) => {
                info!(path = %path.display(), "Config file not found, using defaults");
            }
            ConfigSource::Fallback { path, error } => {
                warn!(
                    error = %error,
                    path = %path.display(),
                    "Failed to load config, using defaults"
                );
            }
        }
    }
}

/// Get the default PeerChat home directory.
pub fn peerchat_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".peerchat")
}

pub fn default_config_path() -> PathBuf {
    peerchat_home().join("config.toml")
}

/// Load configuration from `path` or the default location.
///
/// Never fails: a missing, unreadable or invalid file yields the defaults.
pub fn load_config(path: Option<&Path>) -> (ChatConfig, ConfigSource) {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        return (ChatConfig::default(), ConfigSource::Missing(config_path));
    }

    let loaded = std::fs::read_to_string(&config_path)
        .map_err(ConfigError::from)
        .and_then(|contents| ChatConfig::from_toml_str(&contents));

    match loaded {
        Ok(config) => (config, ConfigSource::File(config_path)),
        Err(error) => (
            ChatConfig::default(),
            ConfigSource::Fallback {
                path: config_path,
                error,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            name = "alice"
            listen_port = 5100

            [[peers]]
            name = "bob"
            address = "127.0.0.1"
            port = 5101
            autoconnect = true
            "#
        )
        .unwrap();

        let (config, source) = load_config(Some(file.path()));
        assert!(matches!(source, ConfigSource::File(_)));
        assert_eq!(config.name, "alice");
        assert_eq!(config.listen_port, 5100);
        assert!(config.peers[0].autoconnect);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");

        let (config, source) = load_config(Some(&path));
        assert!(matches!(source, ConfigSource::Missing(ref p) if *p == path));
        assert_eq!(config, ChatConfig::default());
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_port = \"not a number\"").unwrap();

        let (config, source) = load_config(Some(file.path()));
        assert!(matches!(
            source,
            ConfigSource::Fallback {
                error: ConfigError::Parse(_),
                ..
            }
        ));
        assert_eq!(config, ChatConfig::default());
    }

    #[test]
    fn test_default_path_under_home() {
        let path = default_config_path();
        assert!(path.ends_with(".peerchat/config.toml"));
    }
}
