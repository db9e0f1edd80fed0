//! Core configuration.
//!
//! Loaded from TOML; every key is optional and falls back to its default.
//!
//! ```toml
//! merge_threshold = 0.5
//! ```

use crate::model::merge::{InvalidThreshold, MergeThreshold};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Configuration loading failure.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    /// `merge_threshold` outside `(0, 1]`.
    InvalidThreshold(f64),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config: {err}"),
            Self::InvalidThreshold(value) => write!(f, "{}", InvalidThreshold(*value)),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidThreshold(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    merge_threshold: Option<f64>,
}

/// Runtime settings for the core services.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CoreConfig {
    /// Share of a topic's engaged members that must support a merge.
    pub merge_threshold: MergeThreshold,
}

impl CoreConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(source).map_err(ConfigError::Parse)?;
        let merge_threshold = match raw.merge_threshold {
            Some(value) => {
                MergeThreshold::new(value).map_err(|err| ConfigError::InvalidThreshold(err.0))?
            }
            None => MergeThreshold::default(),
        };
        Ok(Self { merge_threshold })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use crate::model::merge::DEFAULT_MERGE_THRESHOLD;
    use std::io::Write;

    #[test]
    fn empty_config_uses_default_threshold() {
        let config = CoreConfig::from_toml_str("").unwrap();
        assert_eq!(config.merge_threshold.value(), DEFAULT_MERGE_THRESHOLD);
    }

    #[test]
    fn threshold_is_read_and_validated() {
        let config = CoreConfig::from_toml_str("merge_threshold = 0.75").unwrap();
        assert_eq!(config.merge_threshold.value(), 0.75);

        assert!(matches!(
            CoreConfig::from_toml_str("merge_threshold = 1.5"),
            Err(ConfigError::InvalidThreshold(value)) if value == 1.5
        ));
        assert!(matches!(
            CoreConfig::from_toml_str("merge_threshold = \"half\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "merge_threshold = 1.0").unwrap();
        let config = CoreConfig::load(file.path()).unwrap();
        assert_eq!(config.merge_threshold.value(), 1.0);

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CoreConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
