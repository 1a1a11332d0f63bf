//! Range policy and serving configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Point weights and threshold for the range-set abuse score.
///
/// See [`crate::policy::score`] for how these are combined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Sets scoring at or above this are rejected.
    pub threshold: f64,

    /// Awarded to a part whose start lies past its end.
    pub invalid_order: u32,

    /// Awarded to a part narrower than `small_range` bytes.
    pub small: u32,

    /// Width in bytes under which a part counts as small.
    pub small_range: u64,

    /// Awarded when two consecutive parts overlap.
    pub cross: u32,

    /// Applied once to the whole sum when parts arrive out of ascending order.
    pub sort_multiplier: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            threshold: 10.0,
            invalid_order: 10,
            small: 2,
            small_range: 64 * 1024,
            cross: 3,
            sort_multiplier: 1.5,
        }
    }
}

/// Knobs consumed by the range grammar and the range policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Clamp each part's end to the last byte of the resource.
    pub clamp_to_file_bounds: bool,

    /// Reject range sets whose abuse score reaches the threshold.
    pub reject_adversarial: bool,

    /// Maximum width of a single part; wider parts have their end pulled in.
    pub max_chunk_length: u64,

    pub scoring: ScoreWeights,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            clamp_to_file_bounds: false,
            reject_adversarial: true,
            max_chunk_length: u64::MAX,
            scoring: ScoreWeights::default(),
        }
    }
}

/// Configuration for [`crate::serve_file`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub policy: PolicyConfig,

    /// Drain multipart bodies into memory before sending anything, so that a
    /// failing span turns into a 500 instead of a truncated 206.
    pub buffer_multipart: bool,

    /// Largest multipart body that is buffered. Longer ones are streamed
    /// even when `buffer_multipart` is set.
    pub max_buffered_length: u64,

    /// Content types (essence only, e.g. `text/html`) that are always
    /// delivered whole and never advertise `Accept-Ranges`.
    pub unranged_types: Vec<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            buffer_multipart: false,
            max_buffered_length: 64 * 1024 * 1024,
            unranged_types: Vec::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ServeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.policy;
        if policy.max_chunk_length == 0 {
            return Err(ConfigError::Invalid("max_chunk_length must be positive".into()));
        }
        if !(policy.scoring.threshold > 0.0) {
            return Err(ConfigError::Invalid("scoring.threshold must be positive".into()));
        }
        if self.max_buffered_length == 0 {
            return Err(ConfigError::Invalid("max_buffered_length must be positive".into()));
        }
        if !(policy.scoring.sort_multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "scoring.sort_multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Whether a resource of this content type is served with range support.
    pub fn supports_ranges(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        !self
            .unranged_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(essence))
    }
}
