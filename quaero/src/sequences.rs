//! Growing per-row token histories.
//!
//! One row per batch-beam slot, `max_length` columns, write cursor
//! shared by all rows. The input sequence is replayed into every beam
//! row at construction; each decoding step appends exactly one token
//! per row. Beam search reorders rows while appending, via a two-phase
//! select/commit: the scorer selects the permutation, then
//! [`Sequences::commit_reordered`] gathers rows into a spare buffer and
//! swaps, so a beam spawning from another beam's history never reads a
//! row that is being overwritten.

use crate::backend::{Backend, SequenceOps};
use crate::dtype::DType;
use crate::params::SearchParams;
use crate::{Error, Result};

/// Read access over committed token histories, as needed by host-side
/// beam bookkeeping. Reads are only valid after the step's
/// synchronization point.
pub trait SequenceView {
    /// Committed length of every row.
    fn current_length(&self) -> usize;

    /// Host-visible copy of one row's committed history.
    ///
    /// # Errors
    /// Returns an error if `row` is out of range or the read fails.
    fn sequence(&self, row: usize) -> Result<Vec<u32>>;
}

/// The token history buffer backing one search instance.
pub struct Sequences<B: Backend> {
    current: B::Tensor,
    /// Gather target for beam reordering; absent on the greedy path.
    spare: Option<B::Tensor>,
    batch_beam_size: usize,
    max_length: usize,
    current_length: usize,
}

impl<B: Backend> Sequences<B> {
    /// Committed length of every row.
    #[must_use]
    pub fn current_length(&self) -> usize {
        self.current_length
    }

    /// Sequence capacity, input included.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Number of rows.
    #[must_use]
    pub fn batch_beam_size(&self) -> usize {
        self.batch_beam_size
    }

    /// The backing `(batch_beam, max_length)` token tensor.
    #[must_use]
    pub fn tensor(&self) -> &B::Tensor {
        &self.current
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.current_length == self.max_length {
            return Err(Error::SequenceCapacity {
                length: self.current_length,
                max_length: self.max_length,
            });
        }
        Ok(())
    }

    fn check_row_count(&self, tokens: &[u32]) -> Result<()> {
        if tokens.len() != self.batch_beam_size {
            return Err(Error::ShapeMismatch {
                expected: vec![self.batch_beam_size],
                got: vec![tokens.len()],
            });
        }
        Ok(())
    }
}

impl<B: SequenceOps> Sequences<B> {
    /// Allocate the buffer and replay the input sequence into every
    /// beam row of its batch item.
    ///
    /// # Errors
    /// Returns an error if allocation or the upload fails.
    pub fn new(params: &SearchParams) -> Result<Self> {
        let batch_beam_size = params.batch_beam_size();
        let mut staged = vec![params.pad_token_id; batch_beam_size * params.max_length];
        for batch in 0..params.batch_size {
            let input =
                &params.input_ids[batch * params.sequence_length..][..params.sequence_length];
            for beam in 0..params.num_beams {
                let row = batch * params.num_beams + beam;
                staged[row * params.max_length..][..params.sequence_length]
                    .copy_from_slice(input);
            }
        }
        let shape = [batch_beam_size, params.max_length];
        let current = B::from_u32(&shape, &staged)?;
        let spare = if params.num_beams > 1 {
            Some(B::alloc_zeros(&shape, DType::U32)?)
        } else {
            None
        };
        Ok(Self {
            current,
            spare,
            batch_beam_size,
            max_length: params.max_length,
            current_length: params.sequence_length,
        })
    }

    /// Append one token per row at the write cursor (greedy path).
    ///
    /// # Errors
    /// Returns `SequenceCapacity` if every row already holds
    /// `max_length` tokens, or a shape error if `tokens` does not hold
    /// one token per row.
    pub fn append(&mut self, tokens: &[u32]) -> Result<()> {
        self.ensure_capacity()?;
        self.check_row_count(tokens)?;
        B::append_tokens(&mut self.current, self.current_length, tokens)?;
        self.current_length += 1;
        Ok(())
    }

    /// Commit a reordering selected by the beam scorer: gather rows by
    /// `source_rows` into the spare buffer, append `tokens`, then swap
    /// buffers.
    ///
    /// # Errors
    /// Returns `SequenceCapacity` at capacity, a shape error on row
    /// count mismatches, or `Internal` if called on a single-beam
    /// buffer.
    pub fn commit_reordered(&mut self, tokens: &[u32], source_rows: &[u32]) -> Result<()> {
        self.ensure_capacity()?;
        self.check_row_count(tokens)?;
        if source_rows.len() != self.batch_beam_size {
            return Err(Error::ShapeMismatch {
                expected: vec![self.batch_beam_size],
                got: vec![source_rows.len()],
            });
        }
        let spare = self
            .spare
            .as_mut()
            .ok_or_else(|| Error::Internal("reorder commit on a single-beam buffer".into()))?;
        B::gather_append(&self.current, spare, self.current_length, tokens, source_rows)?;
        std::mem::swap(&mut self.current, spare);
        self.current_length += 1;
        Ok(())
    }
}

impl<B: SequenceOps> SequenceView for Sequences<B> {
    fn current_length(&self) -> usize {
        self.current_length
    }

    fn sequence(&self, row: usize) -> Result<Vec<u32>> {
        B::read_row(&self.current, row, self.current_length)
    }
}
