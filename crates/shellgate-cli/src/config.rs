//! Config file discovery and loading.
//!
//! Precedence: `--config`, then `$SHELLGATE_CONFIG`, then
//! `<config_dir>/shellgate/config.json` when it exists, then built-in
//! defaults. Key material is never read from the file.

use crate::error::{CliError, Result};
use shellgate_proxy::GatewayConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SHELLGATE_CONFIG";

/// Where the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Defaults => write!(f, "built-in defaults"),
        }
    }
}

/// Default config file location, whether or not it exists.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("shellgate").join("config.json"))
}

/// Pick the config file to load.
///
/// An explicit path or environment value is returned even if missing so
/// that the read fails loudly; the default location is only used when it
/// exists.
#[must_use]
pub fn resolve_path(
    explicit: Option<&Path>,
    env: Option<OsString>,
    default: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(value) = env.filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(value));
    }
    default.filter(|path| path.is_file())
}

/// Parse a config file.
pub fn load_file(path: &Path) -> Result<GatewayConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the effective configuration for this process.
pub fn load(explicit: Option<&Path>) -> Result<(GatewayConfig, ConfigSource)> {
    match resolve_path(explicit, std::env::var_os(CONFIG_ENV), default_path()) {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            let config = load_file(&path)?;
            Ok((config, ConfigSource::File(path)))
        }
        None => Ok((GatewayConfig::default(), ConfigSource::Defaults)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_explicit_path_wins() {
        let chosen = resolve_path(
            Some(Path::new("/etc/a.json")),
            Some(OsString::from("/etc/b.json")),
            Some(PathBuf::from("/etc/c.json")),
        );
        assert_eq!(chosen, Some(PathBuf::from("/etc/a.json")));
    }

    #[test]
    fn test_env_before_default() {
        let chosen = resolve_path(None, Some(OsString::from("/etc/b.json")), None);
        assert_eq!(chosen, Some(PathBuf::from("/etc/b.json")));

        let chosen = resolve_path(None, Some(OsString::new()), None);
        assert_eq!(chosen, None);
    }

    #[test]
    fn test_default_only_when_present() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("config.json");
        assert_eq!(resolve_path(None, None, Some(missing.clone())), None);

        std::fs::write(&missing, "{}").unwrap();
        assert_eq!(resolve_path(None, None, Some(missing.clone())), Some(missing));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"bind_port": 8443, "secure_cookies": true}}"#).unwrap();

        let config = load_file(file.path()).unwrap();
        assert_eq!(config.bind_port, 8443);
        assert!(config.secure_cookies);
        assert_eq!(config.execute_timeout_secs, 30);
        assert_eq!(config.rate_limit_per_minute, 60);
    }

    #[test]
    fn test_malformed_file_names_path() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();

        let err = load_file(file.path()).unwrap_err();
        assert!(matches!(err, CliError::ConfigParse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = load(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert!(matches!(err, CliError::ConfigRead { .. }));
    }
}
