use crate::adapter::ParserKind;
use crate::input::DEFAULT_BUFFER_CAPACITY;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File looked up in the working directory when no config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "parsefuzz.toml";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    #[serde(default)]
    pub parser: ParserKind,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

pub fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

/// Persistent-mode cases per process before exiting for a fresh restart.
pub fn default_max_iterations() -> u64 {
    1000
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            parser: ParserKind::default(),
            buffer_capacity: default_buffer_capacity(),
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub harness: HarnessSettings,
}

impl HarnessConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    /// Explicit path if given, else [`DEFAULT_CONFIG_FILE`] if it exists, else
    /// built-in defaults. Returns the path actually read, if any.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), anyhow::Error> {
        if let Some(path) = explicit {
            return Ok((Self::load_from_file(path)?, Some(path.to_path_buf())));
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            let config = Self::load_from_file(&default_path)?;
            Ok((config, Some(default_path)))
        } else {
            Ok((Self::default(), None))
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.harness.buffer_capacity == 0 {
            anyhow::bail!("buffer-capacity must be greater than zero");
        }
        if self.harness.max_iterations == 0 {
            anyhow::bail!("max-iterations must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = HarnessConfig::default();
        assert_eq!(config.harness.parser, ParserKind::JsonTree);
        assert_eq!(config.harness.buffer_capacity, 1 << 20);
        assert_eq!(config.harness.max_iterations, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_full_file() {
        let file = write_config(
            "[harness]\nparser = \"json-insitu\"\nbuffer-capacity = 4096\nmax-iterations = 250\n",
        );
        let config = HarnessConfig::load_from_file(file.path()).unwrap();
        assert_eq!(
            config.harness,
            HarnessSettings {
                parser: ParserKind::JsonInsitu,
                buffer_capacity: 4096,
                max_iterations: 250,
            }
        );
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let file = write_config("[harness]\nparser = \"yaml\"\n");
        let config = HarnessConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.harness.parser, ParserKind::Yaml);
        assert_eq!(config.harness.buffer_capacity, default_buffer_capacity());
        assert_eq!(config.harness.max_iterations, default_max_iterations());

        let empty = write_config("");
        assert_eq!(
            HarnessConfig::load_from_file(empty.path()).unwrap(),
            HarnessConfig::default()
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[harness]\ntimeout-ms = 100\n");
        let err = HarnessConfig::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML"), "{err}");
    }

    #[test]
    fn unknown_parser_is_rejected() {
        let file = write_config("[harness]\nparser = \"xml\"\n");
        assert!(HarnessConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = HarnessConfig::load_from_file(Path::new("/nonexistent/parsefuzz.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"), "{err}");
    }

    #[test]
    fn resolve_prefers_explicit_path() {
        let file = write_config("[harness]\nmax-iterations = 7\n");
        let (config, used) = HarnessConfig::resolve(Some(file.path())).unwrap();
        assert_eq!(config.harness.max_iterations, 7);
        assert_eq!(used.as_deref(), Some(file.path()));
    }

    #[test]
    fn validate_rejects_zero_bounds() {
        let mut config = HarnessConfig::default();
        config.harness.buffer_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.harness.max_iterations = 0;
        assert!(config.validate().is_err());
    }
}
