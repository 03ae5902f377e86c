//! Configuration Types

use serde::{Deserialize, Serialize};

use crate::ai::client::ClientConfig;
use crate::constants::segmenter as segmenter_constants;
use crate::pipeline::{ChunkPlanner, TextSegmenter};
use crate::types::Result;

/// Top-level crate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub segmenter: SegmenterSettings,
    pub client: ClientConfig,
    pub storage: StorageSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            segmenter: SegmenterSettings::default(),
            client: ClientConfig::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Config {
    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<()> {
        // The segmenter constructor enforces the window/overlap contract.
        self.segmenter.build().map(|_| ())
    }

    /// Build the chunk planner described by this configuration.
    pub fn planner(&self) -> Result<ChunkPlanner> {
        Ok(ChunkPlanner::new(self.segmenter.build()?))
    }
}

/// Window/overlap tuning for the text segmenter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterSettings {
    pub window_chars: usize,
    pub overlap_chars: usize,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            window_chars: segmenter_constants::WINDOW_CHARS,
            overlap_chars: segmenter_constants::OVERLAP_CHARS,
        }
    }
}

impl SegmenterSettings {
    pub fn build(&self) -> Result<TextSegmenter> {
        TextSegmenter::new(self.window_chars, self.overlap_chars)
    }
}

/// Session store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "studyweave.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_oversized_overlap_rejected() {
        let config = Config {
            segmenter: SegmenterSettings {
                window_chars: 1_000,
                overlap_chars: 900,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
