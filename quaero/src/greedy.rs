//! Greedy search: row-wise arg-max each step, no branching or pruning.

use crate::backend::SearchBackend;
use crate::params::SearchParams;
use crate::search::SearchState;
use crate::sequences::SequenceView;
use crate::{Error, Result};

pub struct GreedySearch<B: SearchBackend> {
    pub(crate) state: SearchState<B>,
    next_tokens: Vec<u32>,
}

impl<B: SearchBackend> GreedySearch<B> {
    pub(crate) fn new(params: SearchParams) -> Result<Self> {
        let state = SearchState::new(params)?;
        let next_tokens = vec![0; state.params.batch_beam_size()];
        Ok(Self { state, next_tokens })
    }

    pub(crate) fn next_tokens_from_logits(&mut self) -> Result<()> {
        self.next_tokens = B::argmax_rows(self.state.scores.tensor())?;
        Ok(())
    }

    pub(crate) fn check_for_eos(&mut self) {
        self.state.check_tokens_for_eos(&mut self.next_tokens);
    }

    pub(crate) fn append_next_tokens_to_sequences(&mut self) -> Result<()> {
        self.state.sequences.append(&self.next_tokens)?;
        if self.state.sequences.current_length() == self.state.params.max_length {
            self.state.done = true;
        }
        Ok(())
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state.done
    }

    pub(crate) fn next_tokens(&self) -> &[u32] {
        &self.next_tokens
    }

    /// Copy each row's sequence out, padded to `max_length`.
    ///
    /// Greedy decoding tracks no cumulative score; when a score buffer
    /// is supplied it is zero-filled.
    pub(crate) fn finalize(
        &self,
        num_return_sequences: usize,
        output: &mut [u32],
        scores: Option<&mut [f32]>,
    ) -> Result<()> {
        if num_return_sequences != 1 {
            return Err(Error::InvalidArgument(format!(
                "num_return_sequences {num_return_sequences} must be 1 for greedy search"
            )));
        }
        let params = &self.state.params;
        let expected = params.batch_size * params.max_length;
        if output.len() != expected {
            return Err(Error::ShapeMismatch {
                expected: vec![params.batch_size, 1, params.max_length],
                got: vec![output.len()],
            });
        }
        for batch in 0..params.batch_size {
            let sequence = self.state.sequences.sequence(batch)?;
            let out = &mut output[batch * params.max_length..][..params.max_length];
            out[..sequence.len()].copy_from_slice(&sequence);
            out[sequence.len()..].fill(params.pad_token_id);
        }
        if let Some(scores) = scores {
            if scores.len() != params.batch_size {
                return Err(Error::ShapeMismatch {
                    expected: vec![params.batch_size, 1],
                    got: vec![scores.len()],
                });
            }
            scores.fill(0.0);
        }
        Ok(())
    }
}
