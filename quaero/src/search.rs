//! Search variants behind one step-loop contract.
//!
//! The variant is chosen once at construction from `num_beams` and
//! never mixed at runtime. Every decoding step drives the same call
//! order regardless of variant:
//!
//! ```text
//! set_logits -> [processors] -> next_tokens_from_logits
//!            -> check_for_eos -> append_next_tokens_to_sequences -> is_done
//! ```
//!
//! Exactly one step is in flight at a time; the selection op inside
//! `next_tokens_from_logits` is the step's synchronization point.

use crate::backend::SearchBackend;
use crate::beam::BeamSearch;
use crate::greedy::GreedySearch;
use crate::params::SearchParams;
use crate::processors::ScoreProcessor;
use crate::scores::ScoreBuffer;
use crate::sequences::Sequences;
use crate::Result;

/// State shared by both search variants: the parameter block, the two
/// step buffers, and the host-visible completion flags.
pub(crate) struct SearchState<B: SearchBackend> {
    pub(crate) params: SearchParams,
    pub(crate) sequences: Sequences<B>,
    pub(crate) scores: ScoreBuffer<B>,
    /// Per-row EOS-met flags; monotonic, never cleared.
    pub(crate) eos_met: Vec<bool>,
    pub(crate) done: bool,
}

impl<B: SearchBackend> SearchState<B> {
    pub(crate) fn new(params: SearchParams) -> Result<Self> {
        params.validate()?;
        let sequences = Sequences::new(&params)?;
        let scores = ScoreBuffer::new(params.batch_beam_size(), params.vocab_size)?;
        let eos_met = vec![false; params.batch_beam_size()];
        Ok(Self {
            params,
            sequences,
            scores,
            eos_met,
            done: false,
        })
    }

    pub(crate) fn set_logits(&mut self, logits: &B::Tensor) -> Result<()> {
        self.scores.set_logits(logits)
    }

    pub(crate) fn apply(&mut self, processor: &dyn ScoreProcessor<B>) -> Result<()> {
        processor.process(&mut self.scores, &self.sequences)
    }

    /// Rewrite EOS selections to padding, raise the rows' flags, and
    /// refresh the global done flag.
    pub(crate) fn check_tokens_for_eos(&mut self, tokens: &mut [u32]) {
        for (met, token) in self.eos_met.iter_mut().zip(tokens.iter_mut()) {
            if *met {
                *token = self.params.pad_token_id;
            } else if *token == self.params.eos_token_id {
                *met = true;
                *token = self.params.pad_token_id;
            }
        }
        self.done = self.eos_met.iter().all(|m| *m);
    }
}

/// A search instance: the greedy or the beam variant, fixed at
/// construction.
pub enum Search<B: SearchBackend> {
    Greedy(GreedySearch<B>),
    Beam(BeamSearch<B>),
}

impl<B: SearchBackend> Search<B> {
    /// Construct the variant implied by `num_beams`.
    ///
    /// # Errors
    /// Returns an error if the parameters fail validation or buffer
    /// allocation fails.
    pub fn new(params: SearchParams) -> Result<Self> {
        if params.num_beams == 1 {
            Ok(Self::Greedy(GreedySearch::new(params)?))
        } else {
            Ok(Self::Beam(BeamSearch::new(params)?))
        }
    }

    /// Load one step's raw logits and normalize them in place.
    ///
    /// # Errors
    /// Returns an error on shape violations or backend failure.
    pub fn set_logits(&mut self, logits: &B::Tensor) -> Result<()> {
        match self {
            Self::Greedy(s) => s.state.set_logits(logits),
            Self::Beam(s) => s.state.set_logits(logits),
        }
    }

    /// Run one score processor over the current step's scores.
    ///
    /// # Errors
    /// Returns an error if the processor's op fails.
    pub fn apply(&mut self, processor: &dyn ScoreProcessor<B>) -> Result<()> {
        match self {
            Self::Greedy(s) => s.state.apply(processor),
            Self::Beam(s) => s.state.apply(processor),
        }
    }

    /// Select this step's tokens from the processed scores.
    ///
    /// # Errors
    /// Returns an error on backend failure or a violated search
    /// invariant.
    pub fn next_tokens_from_logits(&mut self) -> Result<()> {
        match self {
            Self::Greedy(s) => s.next_tokens_from_logits(),
            Self::Beam(s) => s.next_tokens_from_logits(),
        }
    }

    /// Fold this step's selections into the completion flags.
    pub fn check_for_eos(&mut self) {
        match self {
            Self::Greedy(s) => s.check_for_eos(),
            Self::Beam(s) => s.check_for_eos(),
        }
    }

    /// Commit this step's tokens to the sequence buffer.
    ///
    /// # Errors
    /// Returns an error if the buffer is at capacity or the commit
    /// fails.
    pub fn append_next_tokens_to_sequences(&mut self) -> Result<()> {
        match self {
            Self::Greedy(s) => s.append_next_tokens_to_sequences(),
            Self::Beam(s) => s.append_next_tokens_to_sequences(),
        }
    }

    /// Whether generation has terminated. Cheap; reads host-visible
    /// state only.
    pub fn is_done(&mut self) -> bool {
        match self {
            Self::Greedy(s) => s.is_done(),
            Self::Beam(s) => s.is_done(),
        }
    }

    /// This step's selected tokens, one per batch-beam row.
    #[must_use]
    pub fn next_tokens(&self) -> &[u32] {
        match self {
            Self::Greedy(s) => s.next_tokens(),
            Self::Beam(s) => s.next_tokens(),
        }
    }

    /// Per-row EOS-met flags.
    #[must_use]
    pub fn eos_met(&self) -> &[bool] {
        match self {
            Self::Greedy(s) => &s.state.eos_met,
            Self::Beam(s) => &s.state.eos_met,
        }
    }

    /// The committed token histories.
    #[must_use]
    pub fn sequences(&self) -> &Sequences<B> {
        match self {
            Self::Greedy(s) => &s.state.sequences,
            Self::Beam(s) => &s.state.sequences,
        }
    }

    /// The parameter block this search was constructed with.
    #[must_use]
    pub fn params(&self) -> &SearchParams {
        match self {
            Self::Greedy(s) => &s.state.params,
            Self::Beam(s) => &s.state.params,
        }
    }

    /// Copy the final sequences (and their scores) into the
    /// caller-provided buffers.
    ///
    /// # Errors
    /// Returns an error if `num_return_sequences` exceeds `num_beams`
    /// or an output buffer is mis-sized.
    pub fn finalize(
        &mut self,
        num_return_sequences: usize,
        output: &mut [u32],
        scores: Option<&mut [f32]>,
    ) -> Result<()> {
        match self {
            Self::Greedy(s) => s.finalize(num_return_sequences, output, scores),
            Self::Beam(s) => s.finalize(num_return_sequences, output, scores),
        }
    }
}
