//! Beam search orchestration.
//!
//! Each step: broadcast-add every live beam's cumulative score into its
//! token scores, run the top-K primitive (the step's synchronization
//! point), hand the host-visible candidates to the scorer, adopt its
//! selection, and commit the reordered rows to the sequence buffer.

use crate::backend::{topk_scratch_len, SearchBackend};
use crate::beam_scorer::BeamScorer;
use crate::dtype::DType;
use crate::params::SearchParams;
use crate::search::SearchState;
use crate::Result;

pub struct BeamSearch<B: SearchBackend> {
    pub(crate) state: SearchState<B>,
    scorer: BeamScorer,
    /// Two-stage reduction workspace owned for the instance's lifetime.
    scratch: B::Tensor,
    next_tokens: Vec<u32>,
}

impl<B: SearchBackend> BeamSearch<B> {
    pub(crate) fn new(params: SearchParams) -> Result<Self> {
        let state = SearchState::new(params)?;
        let scorer = BeamScorer::new(&state.params);
        let scratch_len =
            topk_scratch_len(state.params.batch_beam_size(), state.params.num_beams);
        let scratch = B::alloc_zeros(&[scratch_len], DType::F32)?;
        let next_tokens = vec![0; state.params.batch_beam_size()];
        Ok(Self {
            state,
            scorer,
            scratch,
            next_tokens,
        })
    }

    pub(crate) fn next_tokens_from_logits(&mut self) -> Result<()> {
        let params = &self.state.params;
        B::add_beam_scores(self.state.scores.tensor_mut(), self.scorer.next_scores())?;
        let candidates = B::beam_topk(
            self.state.scores.tensor(),
            &mut self.scratch,
            params.batch_size,
            params.num_beams,
            2 * params.num_beams,
        )?;
        self.scorer.process(&self.state.sequences, &candidates)?;
        self.next_tokens.copy_from_slice(self.scorer.next_tokens());
        Ok(())
    }

    pub(crate) fn check_for_eos(&mut self) {
        self.state.check_tokens_for_eos(&mut self.next_tokens);
    }

    pub(crate) fn append_next_tokens_to_sequences(&mut self) -> Result<()> {
        self.state
            .sequences
            .commit_reordered(&self.next_tokens, self.scorer.next_indices())
    }

    pub(crate) fn is_done(&mut self) -> bool {
        self.scorer.refresh_done();
        self.scorer.is_done()
            || self.state.sequences.current_length() == self.state.params.max_length
    }

    pub(crate) fn next_tokens(&self) -> &[u32] {
        &self.next_tokens
    }

    pub(crate) fn finalize(
        &mut self,
        num_return_sequences: usize,
        output: &mut [u32],
        scores: Option<&mut [f32]>,
    ) -> Result<()> {
        self.scorer
            .finalize(&self.state.sequences, num_return_sequences, output, scores)
    }
}
