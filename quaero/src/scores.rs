//! Per-step vocabulary score buffer.
//!
//! One `(batch_beam, vocab)` f32 matrix, fully overwritten by
//! [`ScoreBuffer::set_logits`] each step and mutated in place by the
//! processors until token selection consumes it. Nothing here survives
//! a step.

use crate::backend::{Backend, ScoreOps};
use crate::dtype::DType;
use crate::tensor::Tensor;
use crate::{Error, Result};

/// The score matrix backing one search instance.
pub struct ScoreBuffer<B: Backend> {
    scores: B::Tensor,
    batch_beam_size: usize,
    vocab_size: usize,
}

impl<B: Backend> ScoreBuffer<B> {
    /// Vocabulary size (columns per row).
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// The backing score tensor.
    #[must_use]
    pub fn tensor(&self) -> &B::Tensor {
        &self.scores
    }

    /// Mutable access for in-place processors.
    pub fn tensor_mut(&mut self) -> &mut B::Tensor {
        &mut self.scores
    }
}

impl<B: ScoreOps> ScoreBuffer<B> {
    /// Allocate a zeroed score matrix.
    ///
    /// # Errors
    /// Returns an error if allocation fails.
    pub fn new(batch_beam_size: usize, vocab_size: usize) -> Result<Self> {
        let scores = B::alloc_zeros(&[batch_beam_size, vocab_size], DType::F32)?;
        Ok(Self {
            scores,
            batch_beam_size,
            vocab_size,
        })
    }

    /// Overwrite the matrix from a raw logits tensor of shape
    /// `(batch_beam, input_length, vocab)` and normalize every row to
    /// log-probabilities in place.
    ///
    /// The search consumes exactly one new position per step, so
    /// `input_length` must be 1; a forward pass that returns scores for
    /// more positions is rejected rather than silently sliced.
    ///
    /// # Errors
    /// Returns a shape error if the element count does not divide
    /// evenly into rows, and `InvalidArgument` if `input_length != 1`.
    pub fn set_logits(&mut self, logits: &B::Tensor) -> Result<()> {
        let row = self.batch_beam_size * self.vocab_size;
        let numel = logits.numel();
        if row == 0 || numel % row != 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![self.batch_beam_size, 1, self.vocab_size],
                got: logits.shape().to_vec(),
            });
        }
        let input_length = numel / row;
        if input_length != 1 {
            return Err(Error::InvalidArgument(format!(
                "logits cover {input_length} positions per row; the search consumes exactly one"
            )));
        }
        B::copy_last_logits(logits, input_length, &mut self.scores)?;
        B::log_softmax_rows(&mut self.scores)
    }
}
