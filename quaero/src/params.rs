//! Search parameters, immutable for the lifetime of one generation run.

use crate::{Error, Result};

/// Hard cap on beam count imposed by the top-K primitive's two-stage
/// reduction layout.
pub const MAX_NUM_BEAMS: usize = 32;

/// Everything one generation run needs to know up front.
///
/// Built directly, or resolved from a [`crate::config::SearchConfig`]
/// plus the input token ids. Validated once before any buffer is
/// allocated; all fields are fixed afterwards.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Number of independent input sequences.
    pub batch_size: usize,
    /// Beams per batch item; 1 selects the greedy variant.
    pub num_beams: usize,
    /// Vocabulary size (score columns per row).
    pub vocab_size: usize,
    /// Total sequence capacity, input included.
    pub max_length: usize,
    /// Minimum generated length before EOS may be selected.
    pub min_length: usize,
    /// End-of-sequence token id.
    pub eos_token_id: u32,
    /// Padding token id, written past a finished row's end.
    pub pad_token_id: u32,
    /// Repetition penalty factor; 1.0 disables the processor.
    pub repetition_penalty: f32,
    /// Exponent for length normalization of finished hypotheses.
    pub length_penalty: f32,
    /// Stop a batch item as soon as its finished pool is full, without
    /// the best-possible-continuation check.
    pub early_stopping: bool,
    /// Hypotheses returned per batch item by finalize.
    pub num_return_sequences: usize,
    /// Input token ids, `batch_size * sequence_length` entries.
    pub input_ids: Vec<u32>,
    /// Length of each input sequence.
    pub sequence_length: usize,
}

impl SearchParams {
    /// Number of parallel sequence rows.
    #[must_use]
    pub fn batch_beam_size(&self) -> usize {
        self.batch_size * self.num_beams
    }

    /// Check every precondition that must hold before buffers are
    /// allocated or backend work is issued.
    ///
    /// # Errors
    /// Returns `InvalidArgument` describing the first violated
    /// precondition.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidArgument("batch_size must be > 0".into()));
        }
        if self.num_beams == 0 {
            return Err(Error::InvalidArgument("num_beams must be > 0".into()));
        }
        if self.num_beams > MAX_NUM_BEAMS {
            return Err(Error::InvalidArgument(format!(
                "num_beams {} exceeds the supported maximum of {MAX_NUM_BEAMS}",
                self.num_beams
            )));
        }
        if self.vocab_size == 0 {
            return Err(Error::InvalidArgument("vocab_size must be > 0".into()));
        }
        if self.sequence_length == 0 {
            return Err(Error::InvalidArgument(
                "input sequence must not be empty".into(),
            ));
        }
        if self.max_length <= self.sequence_length {
            return Err(Error::InvalidArgument(format!(
                "max_length {} must exceed the input length {}",
                self.max_length, self.sequence_length
            )));
        }
        if self.num_return_sequences == 0 || self.num_return_sequences > self.num_beams {
            return Err(Error::InvalidArgument(format!(
                "num_return_sequences {} must be in 1..={}",
                self.num_return_sequences, self.num_beams
            )));
        }
        if self.eos_token_id as usize >= self.vocab_size {
            return Err(Error::InvalidArgument(format!(
                "eos_token_id {} outside vocabulary of size {}",
                self.eos_token_id, self.vocab_size
            )));
        }
        if self.pad_token_id as usize >= self.vocab_size {
            return Err(Error::InvalidArgument(format!(
                "pad_token_id {} outside vocabulary of size {}",
                self.pad_token_id, self.vocab_size
            )));
        }
        if self.input_ids.len() != self.batch_size * self.sequence_length {
            return Err(Error::InvalidArgument(format!(
                "input_ids holds {} tokens, expected batch_size * sequence_length = {}",
                self.input_ids.len(),
                self.batch_size * self.sequence_length
            )));
        }
        if let Some(&bad) = self
            .input_ids
            .iter()
            .find(|&&t| t as usize >= self.vocab_size)
        {
            return Err(Error::InvalidArgument(format!(
                "input token {bad} outside vocabulary of size {}",
                self.vocab_size
            )));
        }
        if self.repetition_penalty <= 0.0 {
            return Err(Error::InvalidArgument(
                "repetition_penalty must be > 0".into(),
            ));
        }
        Ok(())
    }
}
