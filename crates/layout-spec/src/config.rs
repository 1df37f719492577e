use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::visibility::{ValidationCategory, ValidationMask};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine tuning. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Quiet period before a triggered pass runs.
    pub debounce_ms: u64,
    /// Longest time `generate` waits for its flush to be published.
    pub drain_timeout_ms: u64,
    /// Data type used when the layout does not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Categories shown for components without `showValidations`.
    pub default_show_validations: Vec<ValidationCategory>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 10,
            drain_timeout_ms: 5_000,
            data_type: None,
            default_show_validations: vec![ValidationCategory::Schema],
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn default_show_mask(&self) -> ValidationMask {
        ValidationMask::from_categories(&self.default_show_validations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = EngineConfig::from_json_str("{}").expect("parse");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(10));
        assert_eq!(config.default_show_mask(), ValidationMask::SCHEMA);
    }

    #[test]
    fn fields_are_camel_case() {
        let config = EngineConfig::from_json_str(
            r#"{"debounceMs": 50, "defaultShowValidations": ["Required", "Component"]}"#,
        )
        .expect("parse");
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(
            config.default_show_mask(),
            ValidationMask::REQUIRED | ValidationMask::COMPONENT
        );
    }

    #[test]
    fn unknown_categories_are_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"defaultShowValidations": ["Everything"]}"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
