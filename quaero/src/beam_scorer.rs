//! Host-side beam bookkeeping.
//!
//! Consumes the per-step top-K candidates, maintains the live beams and
//! the bounded pool of finished hypotheses per batch item, and selects
//! the final output sequences. All state here is host memory; the only
//! backend interaction is reading committed token histories through
//! [`SequenceView`] after the step's synchronization point.

use tracing::debug;

use crate::backend::Candidates;
use crate::params::SearchParams;
use crate::sequences::SequenceView;
use crate::{Error, Result};

/// Initial cumulative score of the non-primary beams. Only the first
/// beam of each batch item starts live, so the first step's candidates
/// all extend it.
const INACTIVE_BEAM_SCORE: f32 = -1e9;

/// A finished hypothesis: token history plus length-normalized score.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    pub tokens: Vec<u32>,
    pub score: f32,
}

/// Bounded pool of the best `num_beams` finished hypotheses for one
/// batch item.
#[derive(Debug)]
struct HypothesisPool {
    hyps: Vec<Hypothesis>,
    num_beams: usize,
    length_penalty: f32,
    early_stopping: bool,
    worst_score: f32,
}

impl HypothesisPool {
    fn new(num_beams: usize, length_penalty: f32, early_stopping: bool) -> Self {
        Self {
            hyps: Vec::with_capacity(num_beams + 1),
            num_beams,
            length_penalty,
            early_stopping,
            worst_score: f32::INFINITY,
        }
    }

    fn is_full(&self) -> bool {
        self.hyps.len() >= self.num_beams
    }

    fn normalize(&self, sum_logprobs: f32, length: usize) -> f32 {
        sum_logprobs / (length as f32).powf(self.length_penalty)
    }

    /// Insert a hypothesis scored by length-normalized cumulative
    /// log-probability, evicting the worst entry when over capacity.
    fn add(&mut self, tokens: Vec<u32>, sum_logprobs: f32) {
        let score = self.normalize(sum_logprobs, tokens.len());
        if self.is_full() && score <= self.worst_score {
            return;
        }
        self.hyps.push(Hypothesis { tokens, score });
        if self.hyps.len() > self.num_beams {
            let worst = self
                .hyps
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.score.total_cmp(&b.1.score))
                .map(|(i, _)| i)
                .unwrap_or(0);
            self.hyps.swap_remove(worst);
        }
        self.worst_score = self
            .hyps
            .iter()
            .map(|h| h.score)
            .fold(f32::INFINITY, f32::min);
    }

    /// Whether a live beam carrying `best_sum_logprobs` could still
    /// beat the worst finished hypothesis at `length`.
    fn can_improve(&self, best_sum_logprobs: f32, length: usize) -> bool {
        self.worst_score < self.normalize(best_sum_logprobs, length)
    }

    fn is_done(&self, best_sum_logprobs: f32, length: usize) -> bool {
        if !self.is_full() {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        !self.can_improve(best_sum_logprobs, length)
    }

    /// Entries sorted best-first, stable under score ties.
    fn sorted(&self) -> Vec<Hypothesis> {
        let mut hyps = self.hyps.clone();
        hyps.sort_by(|a, b| b.score.total_cmp(&a.score));
        hyps
    }
}

/// Turns raw top-2K candidates into the next generation of live beams
/// and tracks per-batch completion.
pub struct BeamScorer {
    batch_size: usize,
    num_beams: usize,
    max_length: usize,
    pad_token_id: u32,
    eos_token_id: u32,
    pools: Vec<HypothesisPool>,
    batch_done: Vec<bool>,
    next_scores: Vec<f32>,
    next_tokens: Vec<u32>,
    next_indices: Vec<u32>,
    done_cached: bool,
}

impl BeamScorer {
    #[must_use]
    pub fn new(params: &SearchParams) -> Self {
        let pools = (0..params.batch_size)
            .map(|_| {
                HypothesisPool::new(
                    params.num_beams,
                    params.length_penalty,
                    params.early_stopping,
                )
            })
            .collect();
        let mut next_scores = vec![INACTIVE_BEAM_SCORE; params.batch_beam_size()];
        for batch in 0..params.batch_size {
            next_scores[batch * params.num_beams] = 0.0;
        }
        let next_indices = (0..params.batch_beam_size() as u32).collect();
        Self {
            batch_size: params.batch_size,
            num_beams: params.num_beams,
            max_length: params.max_length,
            pad_token_id: params.pad_token_id,
            eos_token_id: params.eos_token_id,
            pools,
            batch_done: vec![false; params.batch_size],
            next_scores,
            next_tokens: vec![0; params.batch_beam_size()],
            next_indices,
            done_cached: false,
        }
    }

    /// Consume one step's candidates and select the next generation of
    /// live beams.
    ///
    /// Candidates arrive sorted best-first per batch item. An EOS
    /// candidate moves to the finished pool if it ranks within the top
    /// `num_beams`; any other candidate becomes a live beam until
    /// `num_beams` are filled. Ties keep their candidate rank, so the
    /// selection is deterministic.
    ///
    /// # Errors
    /// Returns `Internal` if the candidate pool cannot fill every live
    /// beam. The 2K-candidate layout guarantees it can, so running dry
    /// means an upstream invariant was violated.
    pub fn process<S: SequenceView>(&mut self, sequences: &S, candidates: &Candidates) -> Result<()> {
        if candidates.scores.len() != self.batch_size * candidates.k {
            return Err(Error::Internal(format!(
                "candidate buffer holds {} scores for {} batch items of k = {}",
                candidates.scores.len(),
                self.batch_size,
                candidates.k
            )));
        }
        let current_length = sequences.current_length();
        for batch in 0..self.batch_size {
            if self.batch_done[batch] {
                for beam in 0..self.num_beams {
                    let row = batch * self.num_beams + beam;
                    self.next_tokens[row] = self.pad_token_id;
                    self.next_scores[row] = 0.0;
                    self.next_indices[row] = row as u32;
                }
                continue;
            }

            let (scores, tokens, rows) = candidates.batch(batch);
            let pool = &mut self.pools[batch];
            let mut live = 0;
            for (rank, ((&score, &token), &source_row)) in
                scores.iter().zip(tokens).zip(rows).enumerate()
            {
                if token == self.eos_token_id {
                    // Beyond the top num_beams ranks an EOS can never
                    // enter the final pool; skip instead of wasting a
                    // live slot.
                    if rank >= self.num_beams {
                        continue;
                    }
                    pool.add(sequences.sequence(source_row as usize)?, score);
                } else {
                    let row = batch * self.num_beams + live;
                    self.next_scores[row] = score;
                    self.next_tokens[row] = token;
                    self.next_indices[row] = source_row;
                    live += 1;
                }
                if live == self.num_beams {
                    break;
                }
            }
            if live < self.num_beams {
                return Err(Error::Internal(format!(
                    "candidate pool exhausted: filled {live} of {} beams for batch item {batch}",
                    self.num_beams
                )));
            }

            // The best candidate bounds what any live beam can still
            // reach one token from now.
            let best = scores.first().copied().unwrap_or(f32::NEG_INFINITY);
            if self.pools[batch].is_done(best, current_length + 1) {
                self.batch_done[batch] = true;
                debug!(batch, length = current_length, "beams finished");
            }
        }
        Ok(())
    }

    /// Tokens selected for the next step, one per batch-beam row.
    #[must_use]
    pub fn next_tokens(&self) -> &[u32] {
        &self.next_tokens
    }

    /// Source batch-beam row each selected token extends.
    #[must_use]
    pub fn next_indices(&self) -> &[u32] {
        &self.next_indices
    }

    /// Cumulative log-probability of each live beam.
    #[must_use]
    pub fn next_scores(&self) -> &[f32] {
        &self.next_scores
    }

    /// Evaluate the overall done condition and cache the decision for
    /// [`BeamScorer::is_done`]. Compute once, read as often as needed
    /// within the step.
    pub fn refresh_done(&mut self) {
        self.done_cached = self.batch_done.iter().all(|d| *d);
    }

    /// The decision cached by the last [`BeamScorer::refresh_done`].
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done_cached
    }

    /// Select the final output: per batch item, the best
    /// `num_return_sequences` hypotheses by normalized score, finished
    /// pool first, topped up from the live beams when generation hit
    /// the length cap. Sequences are padded to `max_length`.
    ///
    /// `output` must hold `batch_size * num_return_sequences *
    /// max_length` tokens; `scores`, when given, one score per returned
    /// sequence.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `num_return_sequences` exceeds
    /// `num_beams`, or a shape error if an output buffer is mis-sized.
    pub fn finalize<S: SequenceView>(
        &mut self,
        sequences: &S,
        num_return_sequences: usize,
        output: &mut [u32],
        mut scores: Option<&mut [f32]>,
    ) -> Result<()> {
        if num_return_sequences == 0 || num_return_sequences > self.num_beams {
            return Err(Error::InvalidArgument(format!(
                "num_return_sequences {num_return_sequences} must be in 1..={}",
                self.num_beams
            )));
        }
        let expected = self.batch_size * num_return_sequences * self.max_length;
        if output.len() != expected {
            return Err(Error::ShapeMismatch {
                expected: vec![self.batch_size, num_return_sequences, self.max_length],
                got: vec![output.len()],
            });
        }
        if let Some(ref s) = scores {
            if s.len() != self.batch_size * num_return_sequences {
                return Err(Error::ShapeMismatch {
                    expected: vec![self.batch_size, num_return_sequences],
                    got: vec![s.len()],
                });
            }
        }

        for batch in 0..self.batch_size {
            if !self.batch_done[batch] {
                // Length cap hit with live beams outstanding; they
                // compete with the finished pool on equal terms.
                for beam in 0..self.num_beams {
                    let row = batch * self.num_beams + beam;
                    let history = sequences.sequence(row)?;
                    self.pools[batch].add(history, self.next_scores[row]);
                }
            }
            let ranked = self.pools[batch].sorted();
            debug!(
                batch,
                finished = ranked.len(),
                returning = num_return_sequences,
                "finalizing hypotheses"
            );
            for (i, hyp) in ranked.iter().take(num_return_sequences).enumerate() {
                let out_row = batch * num_return_sequences + i;
                let out = &mut output[out_row * self.max_length..][..self.max_length];
                out[..hyp.tokens.len()].copy_from_slice(&hyp.tokens);
                out[hyp.tokens.len()..].fill(self.pad_token_id);
                if let Some(ref mut s) = scores {
                    s[out_row] = hyp.score;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed histories standing in for the committed sequence buffer.
    struct FakeView {
        rows: Vec<Vec<u32>>,
        length: usize,
    }

    impl SequenceView for FakeView {
        fn current_length(&self) -> usize {
            self.length
        }

        fn sequence(&self, row: usize) -> Result<Vec<u32>> {
            Ok(self.rows[row][..self.length].to_vec())
        }
    }

    fn params(num_beams: usize) -> SearchParams {
        SearchParams {
            batch_size: 1,
            num_beams,
            vocab_size: 10,
            max_length: 6,
            min_length: 0,
            eos_token_id: 9,
            pad_token_id: 0,
            repetition_penalty: 1.0,
            length_penalty: 1.0,
            early_stopping: false,
            num_return_sequences: 1,
            input_ids: vec![1],
            sequence_length: 1,
        }
    }

    fn view(num_beams: usize) -> FakeView {
        FakeView {
            rows: (0..num_beams).map(|i| vec![1, 2 + i as u32, 3]).collect(),
            length: 2,
        }
    }

    fn candidates(entries: &[(f32, u32, u32)]) -> Candidates {
        Candidates {
            scores: entries.iter().map(|e| e.0).collect(),
            tokens: entries.iter().map(|e| e.1).collect(),
            rows: entries.iter().map(|e| e.2).collect(),
            k: entries.len(),
        }
    }

    #[test]
    fn test_top_candidates_become_live_beams() {
        let mut scorer = BeamScorer::new(&params(2));
        let cands = candidates(&[(5.0, 3, 0), (4.0, 4, 1), (3.0, 5, 0), (2.0, 6, 1)]);
        scorer.process(&view(2), &cands).unwrap();
        assert_eq!(scorer.next_tokens(), &[3, 4]);
        assert_eq!(scorer.next_scores(), &[5.0, 4.0]);
        assert_eq!(scorer.next_indices(), &[0, 1]);
    }

    #[test]
    fn test_eos_candidate_never_goes_live() {
        let mut scorer = BeamScorer::new(&params(2));
        let cands = candidates(&[(5.0, 9, 0), (4.0, 4, 1), (3.0, 5, 0), (2.0, 6, 1)]);
        scorer.process(&view(2), &cands).unwrap();
        assert_eq!(scorer.next_tokens(), &[4, 5]);
        assert_eq!(scorer.pools[0].hyps.len(), 1);
    }

    #[test]
    fn test_low_ranked_eos_is_skipped() {
        let mut scorer = BeamScorer::new(&params(2));
        let cands = candidates(&[(5.0, 9, 0), (4.0, 4, 1), (3.0, 9, 0), (2.0, 6, 1)]);
        scorer.process(&view(2), &cands).unwrap();
        // The rank-0 EOS enters the pool; the rank-2 EOS is beyond the
        // top num_beams ranks and is dropped, not pooled.
        assert_eq!(scorer.pools[0].hyps.len(), 1);
        assert_eq!(scorer.next_tokens(), &[4, 6]);
    }

    #[test]
    fn test_tie_break_keeps_candidate_rank() {
        let mut scorer = BeamScorer::new(&params(2));
        let cands = candidates(&[(4.0, 7, 1), (4.0, 3, 0), (4.0, 5, 0), (2.0, 6, 1)]);
        scorer.process(&view(2), &cands).unwrap();
        assert_eq!(scorer.next_tokens(), &[7, 3]);
        assert_eq!(scorer.next_indices(), &[1, 0]);
    }

    #[test]
    fn test_all_eos_candidates_is_an_invariant_violation() {
        let mut scorer = BeamScorer::new(&params(2));
        let cands = candidates(&[(5.0, 9, 0), (4.0, 9, 1), (3.0, 9, 0), (2.0, 9, 1)]);
        let result = scorer.process(&view(2), &cands);
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn test_finished_pool_is_bounded_and_keeps_best() {
        let mut pool = HypothesisPool::new(2, 1.0, false);
        pool.add(vec![1, 2], -4.0);
        pool.add(vec![1, 3], -2.0);
        pool.add(vec![1, 4], -6.0); // worse than both, dropped
        pool.add(vec![1, 5], -1.0); // evicts the -4.0 entry
        assert_eq!(pool.hyps.len(), 2);
        let ranked = pool.sorted();
        assert_eq!(ranked[0].tokens, vec![1, 5]);
        assert_eq!(ranked[1].tokens, vec![1, 3]);
    }

    #[test]
    fn test_length_penalty_normalizes_scores() {
        let pool = HypothesisPool::new(2, 2.0, false);
        assert!((pool.normalize(-8.0, 4) - (-0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_done_requires_full_pool() {
        let mut scorer = BeamScorer::new(&params(2));
        let cands = candidates(&[(5.0, 9, 0), (4.0, 4, 1), (3.0, 5, 0), (2.0, 6, 1)]);
        scorer.process(&view(2), &cands).unwrap();
        scorer.refresh_done();
        assert!(!scorer.is_done());
    }

    #[test]
    fn test_early_stopping_finishes_on_full_pool() {
        let mut p = params(2);
        p.early_stopping = true;
        let mut scorer = BeamScorer::new(&p);
        let cands = candidates(&[(5.0, 9, 0), (4.0, 9, 1), (3.0, 5, 0), (2.0, 6, 1)]);
        scorer.process(&view(2), &cands).unwrap();
        scorer.refresh_done();
        assert!(scorer.is_done());
        // Once done, the next step emits padding for the whole item.
        let cands = candidates(&[(5.0, 3, 0), (4.0, 4, 1), (3.0, 5, 0), (2.0, 6, 1)]);
        scorer.process(&view(2), &cands).unwrap();
        assert_eq!(scorer.next_tokens(), &[0, 0]);
    }

    #[test]
    fn test_finalize_rejects_excess_return_sequences() {
        let mut scorer = BeamScorer::new(&params(2));
        let mut output = vec![0u32; 3 * 6];
        let result = scorer.finalize(&view(2), 3, &mut output, None);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_finalize_pads_and_ranks() {
        let mut p = params(2);
        p.early_stopping = true;
        let mut scorer = BeamScorer::new(&p);
        let cands = candidates(&[(-1.0, 9, 0), (-8.0, 9, 1), (-9.0, 5, 0), (-9.5, 6, 1)]);
        scorer.process(&view(2), &cands).unwrap();
        let mut output = vec![7u32; 2 * 6];
        let mut scores = vec![0f32; 2];
        scorer
            .finalize(&view(2), 2, &mut output, Some(&mut scores))
            .unwrap();
        // Best hypothesis first, both padded to max_length with pad id 0.
        assert_eq!(&output[..6], &[1, 2, 0, 0, 0, 0]);
        assert_eq!(&output[6..], &[1, 3, 0, 0, 0, 0]);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_finalize_fills_from_live_beams_at_length_cap() {
        let mut scorer = BeamScorer::new(&params(2));
        let cands = candidates(&[(-1.0, 3, 0), (-2.0, 4, 1), (-3.0, 5, 0), (-4.0, 6, 1)]);
        scorer.process(&view(2), &cands).unwrap();
        let mut output = vec![0u32; 6];
        let mut scores = vec![0f32; 1];
        scorer
            .finalize(&view(2), 1, &mut output, Some(&mut scores))
            .unwrap();
        // No finished hypotheses; the best live beam is returned.
        assert_eq!(&output[..2], &[1, 2]);
        assert!((scores[0] - (-0.5)).abs() < 1e-6);
    }
}
