//! Step-loop driver.
//!
//! Wires a forward-pass provider to a [`Search`] instance and runs the
//! decoding loop to termination. The loop never issues step N+1 before
//! step N's selection has synchronized, and it has no exit conditions
//! beyond the search's own done flag and the length cap; callers that
//! need timeouts or cancellation layer them between steps.

use tracing::debug;

use crate::backend::{Backend, SearchBackend};
use crate::processors::ScoreProcessor;
use crate::search::Search;
use crate::sequences::Sequences;
use crate::Result;

/// A forward-pass provider: scores the next position of every row.
pub trait ForwardPass<B: Backend> {
    /// Produce logits of shape `(batch_beam, 1, vocab)` for the next
    /// position of every row of `sequences`.
    ///
    /// # Errors
    /// Returns an error if the forward pass fails; the generation is
    /// aborted, not retried.
    fn forward(&mut self, sequences: &Sequences<B>) -> Result<B::Tensor>;
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Every row or beam reached its end-of-sequence condition.
    Stop,
    /// The sequence buffer reached `max_length`.
    Length,
}

/// Final output of one generation run.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// `num_return_sequences` rows per batch item, each padded to
    /// `max_length`.
    pub sequences: Vec<Vec<u32>>,
    /// One normalized score per returned sequence. Zero for greedy
    /// decoding, which tracks no cumulative score.
    pub scores: Vec<f32>,
    pub finish_reason: FinishReason,
}

/// Run the decoding loop to termination and collect the output.
///
/// Each iteration drives the fixed step order: forward pass →
/// `set_logits` → processors → `next_tokens_from_logits` →
/// `check_for_eos` → `append_next_tokens_to_sequences` → `is_done`.
///
/// # Errors
/// Propagates the first error from the forward pass, a processor, or
/// the search itself. After an error the search instance must be
/// discarded; its buffers are in an unspecified step state.
pub fn generate<B, M>(
    search: &mut Search<B>,
    model: &mut M,
    processors: &[Box<dyn ScoreProcessor<B>>],
) -> Result<GenerationOutput>
where
    B: SearchBackend,
    M: ForwardPass<B>,
{
    let mut steps = 0usize;
    while !search.is_done() {
        let logits = model.forward(search.sequences())?;
        search.set_logits(&logits)?;
        for processor in processors {
            search.apply(processor.as_ref())?;
        }
        search.next_tokens_from_logits()?;
        search.check_for_eos();
        search.append_next_tokens_to_sequences()?;
        steps += 1;
        debug!(
            step = steps,
            length = search.sequences().current_length(),
            "decoding step committed"
        );
    }

    let params = search.params();
    let finish_reason = if search.sequences().current_length() == params.max_length {
        FinishReason::Length
    } else {
        FinishReason::Stop
    };
    let num_return_sequences = params.num_return_sequences;
    let max_length = params.max_length;
    let rows = params.batch_size * num_return_sequences;

    let mut output = vec![0u32; rows * max_length];
    let mut scores = vec![0f32; rows];
    search.finalize(num_return_sequences, &mut output, Some(&mut scores))?;
    debug!(steps, ?finish_reason, "generation finished");

    Ok(GenerationOutput {
        sequences: output.chunks(max_length).map(<[u32]>::to_vec).collect(),
        scores,
        finish_reason,
    })
}
