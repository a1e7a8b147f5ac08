//! Backend trait and op trait definitions for the search core.
//!
//! The search state machine is generic over `B: Backend` and expresses
//! its compute requirements through op traits (`ScoreOps`, `SelectOps`,
//! `SequenceOps`). Each op method corresponds to one external parallel
//! primitive with a flat-buffer signature; backends supply the
//! implementation (host loops on CPU, kernels on an accelerator).
//!
//! # Design notes
//!
//! - **Op traits extend `Backend`** — they use `Self::Tensor` from the
//!   supertrait, avoiding repetition.
//! - **Selection ops are synchronization points.** [`SelectOps::argmax_rows`]
//!   and [`SelectOps::beam_topk`] return host-visible results; every op
//!   issued before them on the same search instance has completed by the
//!   time they return. Nothing else in a step blocks the host.
//! - **Allocation lives on `Backend`** because every buffer the search
//!   owns is created through the same allocate/zero/upload capability
//!   and released on drop, on all exit paths.

use crate::dtype::DType;
use crate::tensor::Tensor;
use crate::Result;

/// Number of vocabulary partitions used by the first stage of the
/// top-K reduction. Scratch buffers are sized against this constant.
pub const MAX_VOCAB_PARTS: usize = 128;

/// A compute backend hosting the search's buffers.
pub trait Backend: 'static {
    /// The buffer type for this backend.
    type Tensor: Tensor + Clone;

    /// Allocate a zero-filled tensor.
    ///
    /// # Errors
    /// Returns an error if allocation fails.
    fn alloc_zeros(shape: &[usize], dtype: DType) -> Result<Self::Tensor>;

    /// Allocate a tensor initialized from host f32 data.
    ///
    /// # Errors
    /// Returns an error if allocation or the upload fails, or if
    /// `data` does not match `shape`.
    fn from_f32(shape: &[usize], data: &[f32]) -> Result<Self::Tensor>;

    /// Allocate a tensor initialized from host u32 data.
    ///
    /// # Errors
    /// Returns an error if allocation or the upload fails, or if
    /// `data` does not match `shape`.
    fn from_u32(shape: &[usize], data: &[u32]) -> Result<Self::Tensor>;
}

/// Row-wise transforms over the `(batch_beam, vocab)` score matrix.
pub trait ScoreOps: Backend {
    /// Copy the last-position slice of `logits`, shaped
    /// `(batch_beam, input_length, vocab)`, into the score matrix.
    ///
    /// # Errors
    /// Returns an error if shapes are inconsistent.
    fn copy_last_logits(
        logits: &Self::Tensor,
        input_length: usize,
        scores: &mut Self::Tensor,
    ) -> Result<()>;

    /// In-place numerically stable log-softmax over every row:
    /// subtract the row max, exponentiate, sum, log-normalize.
    ///
    /// # Errors
    /// Returns an error if the op fails or the tensor is not a 2-D f32
    /// matrix.
    fn log_softmax_rows(scores: &mut Self::Tensor) -> Result<()>;

    /// Broadcast-add one cumulative score per row into that row's
    /// token scores.
    ///
    /// # Errors
    /// Returns an error if `beam_scores` has fewer entries than rows.
    fn add_beam_scores(scores: &mut Self::Tensor, beam_scores: &[f32]) -> Result<()>;

    /// Rescale the score of every token id already present in a row's
    /// history: `score < 0 ? score * penalty : score / penalty`.
    ///
    /// `sequences` is the `(batch_beam, max_length)` token matrix; only
    /// the first `current_length` columns are history.
    ///
    /// # Errors
    /// Returns an error if shapes are inconsistent.
    fn repetition_penalty(
        scores: &mut Self::Tensor,
        sequences: &Self::Tensor,
        current_length: usize,
        penalty: f32,
    ) -> Result<()>;

    /// Overwrite one vocabulary column of every row with `value`.
    ///
    /// # Errors
    /// Returns an error if `column` is out of range.
    fn fill_column(scores: &mut Self::Tensor, column: usize, value: f32) -> Result<()>;
}

/// Host-visible top-K selection output: `k` entries per batch item,
/// each batch item's entries sorted by descending score.
#[derive(Debug, Clone)]
pub struct Candidates {
    /// Cumulative scores, `batch_size * k` entries.
    pub scores: Vec<f32>,
    /// Selected token ids, `batch_size * k` entries.
    pub tokens: Vec<u32>,
    /// Batch-beam row each candidate extends, `batch_size * k` entries.
    pub rows: Vec<u32>,
    /// Candidates per batch item.
    pub k: usize,
}

impl Candidates {
    /// The candidate triples of one batch item, best first.
    #[must_use]
    pub fn batch(&self, batch: usize) -> (&[f32], &[u32], &[u32]) {
        let range = batch * self.k..(batch + 1) * self.k;
        (
            &self.scores[range.clone()],
            &self.tokens[range.clone()],
            &self.rows[range],
        )
    }
}

/// Token selection primitives.
pub trait SelectOps: Backend {
    /// Row-wise arg-max: one token per row, host-visible.
    /// Synchronizing.
    ///
    /// # Errors
    /// Returns an error if the op fails.
    fn argmax_rows(scores: &Self::Tensor) -> Result<Vec<u32>>;

    /// Top-`k` over each batch item's `num_beams * vocab` candidate
    /// scores, via a two-stage reduction: stage one reduces up to
    /// [`MAX_VOCAB_PARTS`] vocabulary partitions per row, stage two
    /// merges partitions and beams. `scratch` must hold at least
    /// [`topk_scratch_len`] f32 elements. Synchronizing.
    ///
    /// Supports at most 32 beams; more is an explicit error, never a
    /// truncated result.
    ///
    /// # Errors
    /// Returns an error if `num_beams > 32`, the scratch buffer is too
    /// small, or shapes are inconsistent.
    fn beam_topk(
        scores: &Self::Tensor,
        scratch: &mut Self::Tensor,
        batch_size: usize,
        num_beams: usize,
        k: usize,
    ) -> Result<Candidates>;
}

/// Scratch element count required by [`SelectOps::beam_topk`]: the
/// stage-one partition buffers plus the stage-two per-row buffers, for
/// scores and tokens both.
#[must_use]
pub const fn topk_scratch_len(batch_beam_size: usize, num_beams: usize) -> usize {
    batch_beam_size * (MAX_VOCAB_PARTS + 1) * num_beams * 2 * 2
}

/// Sequence buffer primitives.
pub trait SequenceOps: Backend {
    /// Write `tokens[row]` at `column` of every row of the
    /// `(batch_beam, max_length)` token matrix.
    ///
    /// # Errors
    /// Returns an error if shapes are inconsistent.
    fn append_tokens(seqs: &mut Self::Tensor, column: usize, tokens: &[u32]) -> Result<()>;

    /// For every destination row `i`, copy the first `column` tokens of
    /// row `rows[i]` of `src` into row `i` of `dst`, then write
    /// `tokens[i]` at `column`. `src` and `dst` are distinct buffers so
    /// gathered rows never alias the rows they are copied from.
    ///
    /// # Errors
    /// Returns an error if shapes are inconsistent or a source row is
    /// out of range.
    fn gather_append(
        src: &Self::Tensor,
        dst: &mut Self::Tensor,
        column: usize,
        tokens: &[u32],
        rows: &[u32],
    ) -> Result<()>;

    /// Host-visible copy of one row's first `len` tokens.
    ///
    /// # Errors
    /// Returns an error if `row` or `len` is out of range.
    fn read_row(seqs: &Self::Tensor, row: usize, len: usize) -> Result<Vec<u32>>;
}

/// Every op trait the search state machines require. Blanket-implemented
/// for any backend providing all of them.
pub trait SearchBackend: Backend + ScoreOps + SelectOps + SequenceOps {}

impl<B: Backend + ScoreOps + SelectOps + SequenceOps> SearchBackend for B {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_len_matches_layout() {
        // 2 batch items x 4 beams, k = 8: stage-one holds 128 partition
        // results per row per candidate, stage-two one per candidate,
        // doubled for the token planes.
        let bb = 8;
        let len = topk_scratch_len(bb, 4);
        assert_eq!(len, bb * 129 * 4 * 2 * 2);
    }
}
