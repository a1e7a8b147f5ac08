//! Generation configuration
//!
//! Parsed from a JSON file or string, typically shipped next to the
//! model weights. Optional knobs fall back to serde defaults; the
//! config is resolved against the input batch into [`SearchParams`].

use serde::Deserialize;
use std::path::Path;

use crate::params::SearchParams;
use crate::{Error, Result};

/// Configuration for one generation run.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Total sequence capacity, input included.
    pub max_length: usize,

    /// Minimum generated length before EOS may be selected.
    #[serde(default)]
    pub min_length: usize,

    /// Beams per batch item; 1 selects greedy decoding.
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,

    /// Repetition penalty factor; 1.0 disables it.
    #[serde(default = "default_penalty")]
    pub repetition_penalty: f32,

    /// Length-normalization exponent for finished hypotheses.
    #[serde(default = "default_penalty")]
    pub length_penalty: f32,

    /// Stop a batch item as soon as its finished pool is full.
    #[serde(default)]
    pub early_stopping: bool,

    /// Hypotheses returned per batch item.
    #[serde(default = "default_num_return_sequences")]
    pub num_return_sequences: usize,

    /// End-of-sequence token id.
    pub eos_token_id: u32,

    /// Padding token id.
    pub pad_token_id: u32,
}

fn default_num_beams() -> usize {
    1
}

fn default_penalty() -> f32 {
    1.0
}

fn default_num_return_sequences() -> usize {
    1
}

impl SearchConfig {
    /// Parse a config from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or required fields
    /// are missing.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a config from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Resolve this config against an input batch into validated
    /// [`SearchParams`].
    ///
    /// `input_ids` must hold `batch_size` sequences of equal length,
    /// concatenated.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the batch shape is inconsistent or
    /// any resolved parameter fails validation.
    pub fn into_params(
        self,
        vocab_size: usize,
        batch_size: usize,
        input_ids: Vec<u32>,
    ) -> Result<SearchParams> {
        if batch_size == 0 || input_ids.len() % batch_size != 0 {
            return Err(Error::InvalidArgument(format!(
                "input_ids holds {} tokens, not divisible into {batch_size} sequences",
                input_ids.len()
            )));
        }
        let sequence_length = input_ids.len() / batch_size;
        let params = SearchParams {
            batch_size,
            num_beams: self.num_beams,
            vocab_size,
            max_length: self.max_length,
            min_length: self.min_length,
            eos_token_id: self.eos_token_id,
            pad_token_id: self.pad_token_id,
            repetition_penalty: self.repetition_penalty,
            length_penalty: self.length_penalty,
            early_stopping: self.early_stopping,
            num_return_sequences: self.num_return_sequences,
            input_ids,
            sequence_length,
        };
        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = SearchConfig::from_json(
            r#"{"max_length": 32, "eos_token_id": 2, "pad_token_id": 0}"#,
        )
        .unwrap();
        assert_eq!(config.num_beams, 1);
        assert_eq!(config.min_length, 0);
        assert!((config.repetition_penalty - 1.0).abs() < f32::EPSILON);
        assert!((config.length_penalty - 1.0).abs() < f32::EPSILON);
        assert!(!config.early_stopping);
        assert_eq!(config.num_return_sequences, 1);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let result = SearchConfig::from_json(r#"{"max_length": 32}"#);
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_into_params_resolves_sequence_length() {
        let config = SearchConfig::from_json(
            r#"{"max_length": 8, "num_beams": 2, "eos_token_id": 2, "pad_token_id": 0}"#,
        )
        .unwrap();
        let params = config.into_params(10, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(params.sequence_length, 3);
        assert_eq!(params.batch_beam_size(), 4);
    }

    #[test]
    fn test_into_params_rejects_ragged_batch() {
        let config = SearchConfig::from_json(
            r#"{"max_length": 8, "eos_token_id": 2, "pad_token_id": 0}"#,
        )
        .unwrap();
        let result = config.into_params(10, 2, vec![1, 2, 3]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
