//! Pipeline configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! max_session_exchanges = 300
//! overlap_percentage = 0.2
//!
//! [split]
//! seed = 7
//!
//! [speakers.aliases]
//! "DR. FELDER" = "therapist"
//! "LORETTA" = "client"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::speaker::AliasTable;

/// Instruction text used when none is configured.
pub const DEFAULT_INSTRUCTION: &str = "You are a compassionate, professional therapist. \
Read the conversation so far and write the next response in the session.";

const RATIO_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Only consumed by downstream tokenization; echoed into the manifest.
    pub model_name: String,
    /// Upper bound on approximate tokens per example (input + output).
    pub max_length: usize,
    pub max_session_exchanges: usize,
    pub overlap_percentage: f64,
    /// Inclusive word-count bounds on an example's output message.
    pub min_exchange_length: usize,
    pub max_exchange_length: usize,
    pub input_data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Number of context exchanges before the target exchange.
    pub context_exchanges: usize,
    pub window_stride: usize,
    pub instruction_template: String,
    pub therapist_targets_only: bool,
    pub plaintext_delimiter: String,
    pub split: SplitConfig,
    pub speakers: SpeakerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_name: "meta-llama/Llama-3.1-8B-Instruct".to_string(),
            max_length: 2048,
            max_session_exchanges: 300,
            overlap_percentage: 0.2,
            min_exchange_length: 1,
            max_exchange_length: 200,
            input_data_dir: PathBuf::from("data/transcripts"),
            output_dir: PathBuf::from("data/processed"),
            cache_dir: PathBuf::from(".cache"),
            context_exchanges: 2,
            window_stride: 1,
            instruction_template: DEFAULT_INSTRUCTION.to_string(),
            therapist_targets_only: false,
            plaintext_delimiter: ":".to_string(),
            split: SplitConfig::default(),
            speakers: SpeakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub seed: u64,
    pub train_ratio: f64,
    pub validation_ratio: f64,
    pub test_ratio: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            train_ratio: 0.8,
            validation_ratio: 0.1,
            test_ratio: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    pub aliases: AliasTable,
}

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkParams {
    max_session_exchanges: usize,
    overlap_fraction: f64,
}

impl ChunkParams {
    pub fn new(max_session_exchanges: usize, overlap_fraction: f64) -> Result<Self, ConfigError> {
        if max_session_exchanges == 0 {
            return Err(ConfigError::ZeroSessionThreshold);
        }
        if !(0.0..1.0).contains(&overlap_fraction) {
            return Err(ConfigError::OverlapOutOfRange(overlap_fraction));
        }
        Ok(Self {
            max_session_exchanges,
            overlap_fraction,
        })
    }

    pub fn max_session_exchanges(&self) -> usize {
        self.max_session_exchanges
    }

    /// `floor(T * (1 - f))`, never below 1.
    pub fn step(&self) -> usize {
        let raw = self.max_session_exchanges as f64 * (1.0 - self.overlap_fraction);
        // Nudge so that e.g. 10 * 0.7 = 6.9999999 still floors to 7.
        ((raw + 1e-9).floor() as usize).max(1)
    }
}

/// Validated example-window parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowParams {
    pub context_exchanges: usize,
    pub stride: usize,
    pub min_exchange_length: usize,
    pub max_exchange_length: usize,
    pub max_tokens: usize,
    pub therapist_targets_only: bool,
    pub instruction: String,
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Check every parameter. Called before any document is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunk_params()?;
        self.window_params()?;
        if self.plaintext_delimiter.is_empty() {
            return Err(ConfigError::EmptyDelimiter);
        }
        let SplitConfig {
            train_ratio,
            validation_ratio,
            test_ratio,
            ..
        } = self.split;
        let ratios_ok = [train_ratio, validation_ratio, test_ratio]
            .iter()
            .all(|r| r.is_finite() && *r >= 0.0)
            && ((train_ratio + validation_ratio + test_ratio) - 1.0).abs() <= RATIO_TOLERANCE;
        if !ratios_ok {
            return Err(ConfigError::InvalidSplitRatios {
                train: train_ratio,
                validation: validation_ratio,
                test: test_ratio,
            });
        }
        Ok(())
    }

    pub fn chunk_params(&self) -> Result<ChunkParams, ConfigError> {
        ChunkParams::new(self.max_session_exchanges, self.overlap_percentage)
    }

    pub fn window_params(&self) -> Result<WindowParams, ConfigError> {
        if self.window_stride == 0 {
            return Err(ConfigError::ZeroStride);
        }
        if self.min_exchange_length > self.max_exchange_length {
            return Err(ConfigError::InvertedLengthBounds {
                min: self.min_exchange_length,
                max: self.max_exchange_length,
            });
        }
        Ok(WindowParams {
            context_exchanges: self.context_exchanges,
            stride: self.window_stride,
            min_exchange_length: self.min_exchange_length,
            max_exchange_length: self.max_exchange_length,
            max_tokens: self.max_length,
            therapist_targets_only: self.therapist_targets_only,
            instruction: self.instruction_template.clone(),
        })
    }
}
