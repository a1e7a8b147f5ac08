//! Score post-processors.
//!
//! Applied between normalization and token selection, in whatever
//! order the driver chooses. Each processor mutates the score matrix
//! in place; none of them read it back to the host.

use crate::backend::ScoreOps;
use crate::params::SearchParams;
use crate::scores::ScoreBuffer;
use crate::sequences::Sequences;
use crate::Result;

/// An in-place transform of the score matrix.
pub trait ScoreProcessor<B: ScoreOps> {
    /// Apply this processor's transformation.
    ///
    /// # Errors
    /// Returns an error if the underlying op fails.
    fn process(&self, scores: &mut ScoreBuffer<B>, sequences: &Sequences<B>) -> Result<()>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Forces EOS to lose selection until every row has generated at least
/// `min_length` tokens, by writing the most negative representable
/// score into the EOS column.
pub struct MinLength {
    min_length: usize,
    eos_token_id: u32,
}

impl MinLength {
    #[must_use]
    pub fn new(min_length: usize, eos_token_id: u32) -> Self {
        Self {
            min_length,
            eos_token_id,
        }
    }
}

impl<B: ScoreOps> ScoreProcessor<B> for MinLength {
    fn process(&self, scores: &mut ScoreBuffer<B>, sequences: &Sequences<B>) -> Result<()> {
        if sequences.current_length() >= self.min_length {
            return Ok(());
        }
        B::fill_column(scores.tensor_mut(), self.eos_token_id as usize, f32::MIN)
    }

    fn name(&self) -> &'static str {
        "min_length"
    }
}

/// Discourages repeats by rescaling the score of every token already
/// present in a row's history: positive scores are divided by the
/// penalty, non-positive scores multiplied.
pub struct RepetitionPenalty {
    penalty: f32,
}

impl RepetitionPenalty {
    #[must_use]
    pub fn new(penalty: f32) -> Self {
        Self { penalty }
    }
}

impl<B: ScoreOps> ScoreProcessor<B> for RepetitionPenalty {
    fn process(&self, scores: &mut ScoreBuffer<B>, sequences: &Sequences<B>) -> Result<()> {
        if (self.penalty - 1.0).abs() < f32::EPSILON {
            return Ok(());
        }
        B::repetition_penalty(
            scores.tensor_mut(),
            sequences.tensor(),
            sequences.current_length(),
            self.penalty,
        )
    }

    fn name(&self) -> &'static str {
        "repetition_penalty"
    }
}

/// Build the processor pipeline implied by the parameters: min-length
/// masking when `min_length > 0`, repetition penalty when the factor
/// is not 1.0.
#[must_use]
pub fn from_params<B: ScoreOps>(params: &SearchParams) -> Vec<Box<dyn ScoreProcessor<B>>> {
    let mut processors: Vec<Box<dyn ScoreProcessor<B>>> = Vec::new();
    if params.min_length > 0 {
        processors.push(Box::new(MinLength::new(
            params.min_length,
            params.eos_token_id,
        )));
    }
    if (params.repetition_penalty - 1.0).abs() >= f32::EPSILON {
        processors.push(Box::new(RepetitionPenalty::new(params.repetition_penalty)));
    }
    processors
}
