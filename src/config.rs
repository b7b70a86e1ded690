//! Configuration file parser for ~/.config/feedvault/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Keys that serde does not recognize still parse (no `deny_unknown_fields`),
//! but each one gets a warning so typos are visible in the log.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: config file over the size cap.
    #[error("config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration for the binary and the storage factories.
///
/// Every field carries `#[serde(default)]`, so a config file may name any
/// subset of keys; the rest come from `Default::default()`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend key ("vault", "sqlite", or "memory").
    pub backend: String,

    /// Archive directory. `None` uses [`default_archive_path`].
    pub archive_dir: Option<PathBuf>,

    /// Whether changes are committed on a timer. When false, nothing is
    /// persisted until an explicit commit.
    pub auto_commit: bool,

    /// Debounce window for timed commits, in milliseconds.
    pub commit_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: "vault".to_string(),
            archive_dir: None,
            auto_commit: true,
            commit_interval_ms: 3000,
        }
    }
}

/// Archive location used when the config file does not name one:
/// `$HOME/.local/share/feedvault/archive`, or `./feedvault-archive` when
/// HOME is unset.
pub fn default_archive_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("feedvault")
            .join("archive"),
        _ => PathBuf::from("./feedvault-archive"),
    }
}

/// Default config file location: `$HOME/.config/feedvault/config.toml`.
pub fn default_config_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home)
            .join(".config")
            .join("feedvault")
            .join("config.toml"),
        _ => PathBuf::from("./feedvault.toml"),
    }
}

impl Config {
    /// SEC-014: cap on config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// The archive directory, falling back to [`default_archive_path`].
    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir.clone().unwrap_or_else(default_archive_path)
    }

    /// Read and parse a TOML config file.
    ///
    /// A missing or empty file yields the defaults; malformed TOML is a
    /// `Parse` error; unrecognized keys parse fine but are logged.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: size check before the read, so a runaway or corrupted
        // file cannot balloon memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "{} bytes, cap is {}",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File removed between the metadata call and the read.
                tracing::debug!(path = %path.display(), "config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "empty config file, using defaults");
            return Ok(Self::default());
        }

        // A first pass over the raw table surfaces unrecognized keys.
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["backend", "archive_dir", "auto_commit", "commit_interval_ms"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "unrecognized config key, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), backend = %config.backend, "Loaded configuration");
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend, "vault");
        assert!(config.archive_dir.is_none());
        assert!(config.auto_commit);
        assert_eq!(config.commit_interval_ms, 3000);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedvault_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.backend, "vault");
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("feedvault_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend, "vault");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = std::env::temp_dir().join("feedvault_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "backend = \"sqlite\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend, "sqlite");
        assert_eq!(config.commit_interval_ms, 3000); // default
        assert!(config.auto_commit); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_all_keys_parsed() {
        let dir = std::env::temp_dir().join("feedvault_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
backend = "memory"
archive_dir = "/var/lib/feedvault"
auto_commit = false
commit_interval_ms = 250
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend, "memory");
        assert_eq!(config.archive_path(), PathBuf::from("/var/lib/feedvault"));
        assert!(!config.auto_commit);
        assert_eq!(config.commit_interval_ms, 250);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_archive_path_falls_back_to_default() {
        let config = Config::default();
        assert_eq!(config.archive_path(), default_archive_path());

        let mut config = Config::default();
        config.archive_dir = Some(PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.archive_path(), PathBuf::from("/tmp/elsewhere"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("feedvault_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let result = Config::load(&path);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let msg = err.to_string();
        assert!(msg.contains("not valid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let dir = std::env::temp_dir().join("feedvault_config_test_unknown");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
backend = "vault"
totally_fake_key = "should not fail"
another_unknown = 42
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend, "vault");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let dir = std::env::temp_dir().join("feedvault_config_test_wrongtype");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        // backend should be a string, not an integer
        std::fs::write(&path, "backend = 42\n").unwrap();

        let result = Config::load(&path);
        assert!(result.is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let dir = std::env::temp_dir().join("feedvault_config_test_whitespace");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend, "vault");

        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-014: size cap
    #[test]
    fn test_oversized_file_rejected() {
        let dir = std::env::temp_dir().join("feedvault_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        // one byte over the cap
        let content = "a".repeat(1_048_577);
        std::fs::write(&path, content).unwrap();

        let result = Config::load(&path);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_exactly_at_cap_accepted() {
        let dir = std::env::temp_dir().join("feedvault_config_test_at_limit");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        // valid TOML padded out to exactly the cap
        let mut content = "backend = \"vault\"\n".to_string();
        while content.len() < 1_048_576 - 20 {
            content.push_str("# padding comment\n");
        }
        content.truncate(1_048_576);
        std::fs::write(&path, &content).unwrap();

        let result = Config::load(&path);
        assert!(result.is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }
}
