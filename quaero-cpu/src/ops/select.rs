//! Token selection: row-wise arg-max and the two-stage top-K reduction.

use quaero::backend::{topk_scratch_len, Candidates, SelectOps, MAX_VOCAB_PARTS};
use quaero::params::MAX_NUM_BEAMS;
use quaero::tensor::Tensor;
use quaero::{DType, Error, Result};

use super::matrix_dims;
use crate::{CpuBackend, CpuTensor};

impl SelectOps for CpuBackend {
    fn argmax_rows(scores: &CpuTensor) -> Result<Vec<u32>> {
        let (rows, vocab) = matrix_dims(scores, DType::F32)?;
        let data = scores.as_f32_slice();
        let mut out = Vec::with_capacity(rows);
        for row in data.chunks_exact(vocab) {
            let mut max_idx = 0u32;
            let mut max_val = f32::NEG_INFINITY;
            #[allow(clippy::cast_possible_truncation)]
            for (i, &v) in row.iter().enumerate() {
                if v > max_val {
                    max_val = v;
                    max_idx = i as u32;
                }
            }
            out.push(max_idx);
        }
        Ok(out)
    }

    fn beam_topk(
        scores: &CpuTensor,
        scratch: &mut CpuTensor,
        batch_size: usize,
        num_beams: usize,
        k: usize,
    ) -> Result<Candidates> {
        if num_beams == 0 || num_beams > MAX_NUM_BEAMS {
            return Err(Error::InvalidArgument(format!(
                "num_beams {num_beams} outside the supported 1..={MAX_NUM_BEAMS}"
            )));
        }
        if k == 0 || k > 2 * num_beams {
            return Err(Error::InvalidArgument(format!(
                "k {k} outside the supported 1..={}",
                2 * num_beams
            )));
        }
        let (rows, vocab) = matrix_dims(scores, DType::F32)?;
        if rows != batch_size * num_beams {
            return Err(Error::ShapeMismatch {
                expected: vec![batch_size * num_beams, vocab],
                got: vec![rows, vocab],
            });
        }
        if scratch.dtype() != DType::F32
            || scratch.numel() < topk_scratch_len(rows, num_beams)
        {
            return Err(Error::ShapeMismatch {
                expected: vec![topk_scratch_len(rows, num_beams)],
                got: vec![scratch.numel()],
            });
        }

        let parts = MAX_VOCAB_PARTS.min(vocab);
        let part_size = vocab.div_ceil(parts);
        let stage1 = rows * parts * k;
        let stage2 = rows * k;

        let data = scores.as_f32_slice();
        let workspace = scratch.as_f32_slice_mut();
        let (s1_scores, rest) = workspace.split_at_mut(stage1);
        let (s1_tokens, rest) = rest.split_at_mut(stage1);
        let (s2_scores, rest) = rest.split_at_mut(stage2);
        let (s2_tokens, _) = rest.split_at_mut(stage2);

        // Stage one: top-k within each vocabulary partition of each row.
        for row in 0..rows {
            let row_scores = &data[row * vocab..][..vocab];
            for part in 0..parts {
                let start = part * part_size;
                let end = (start + part_size).min(vocab);
                let slot = (row * parts + part) * k;
                partition_top_k(
                    row_scores.get(start..end).unwrap_or(&[]),
                    start,
                    &mut s1_scores[slot..slot + k],
                    &mut s1_tokens[slot..slot + k],
                );
            }
        }

        // Stage two: merge each row's partitions.
        for row in 0..rows {
            let src = row * parts * k;
            let dst = row * k;
            merge_top_k(
                &s1_scores[src..src + parts * k],
                &s1_tokens[src..src + parts * k],
                &mut s2_scores[dst..dst + k],
                &mut s2_tokens[dst..dst + k],
            );
        }

        // Final merge across the beams of each batch item, carrying the
        // global source row. Stable sort keeps row-major rank order on
        // score ties.
        let mut candidates = Candidates {
            scores: Vec::with_capacity(batch_size * k),
            tokens: Vec::with_capacity(batch_size * k),
            rows: Vec::with_capacity(batch_size * k),
            k,
        };
        let mut merged: Vec<(f32, u32, u32)> = Vec::with_capacity(num_beams * k);
        for batch in 0..batch_size {
            merged.clear();
            for beam in 0..num_beams {
                let row = batch * num_beams + beam;
                for i in 0..k {
                    #[allow(clippy::cast_possible_truncation)]
                    merged.push((
                        s2_scores[row * k + i],
                        s2_tokens[row * k + i].to_bits(),
                        row as u32,
                    ));
                }
            }
            merged.sort_by(|a, b| b.0.total_cmp(&a.0));
            for &(score, token, row) in &merged[..k] {
                candidates.scores.push(score);
                candidates.tokens.push(token);
                candidates.rows.push(row);
            }
        }
        Ok(candidates)
    }
}

/// Top-k selection over one contiguous partition, written sorted
/// descending. Unused slots keep the negative-infinity sentinel. Token
/// ids travel through the f32 plane bit-for-bit.
fn partition_top_k(values: &[f32], token_offset: usize, out_scores: &mut [f32], out_tokens: &mut [f32]) {
    out_scores.fill(f32::NEG_INFINITY);
    out_tokens.fill(0.0);
    let k = out_scores.len();
    for (i, &v) in values.iter().enumerate() {
        if v <= out_scores[k - 1] {
            continue;
        }
        // Strict comparison places score ties after earlier entries,
        // keeping lower token ids first.
        let mut pos = k - 1;
        while pos > 0 && v > out_scores[pos - 1] {
            pos -= 1;
        }
        for j in (pos + 1..k).rev() {
            out_scores[j] = out_scores[j - 1];
            out_tokens[j] = out_tokens[j - 1];
        }
        out_scores[pos] = v;
        #[allow(clippy::cast_possible_truncation)]
        {
            out_tokens[pos] = f32::from_bits((token_offset + i) as u32);
        }
    }
}

/// Merge already-reduced (score, token) pairs into a sorted top-k.
fn merge_top_k(src_scores: &[f32], src_tokens: &[f32], out_scores: &mut [f32], out_tokens: &mut [f32]) {
    out_scores.fill(f32::NEG_INFINITY);
    out_tokens.fill(0.0);
    let k = out_scores.len();
    for (i, &v) in src_scores.iter().enumerate() {
        if v <= out_scores[k - 1] {
            continue;
        }
        let mut pos = k - 1;
        while pos > 0 && v > out_scores[pos - 1] {
            pos -= 1;
        }
        for j in (pos + 1..k).rev() {
            out_scores[j] = out_scores[j - 1];
            out_tokens[j] = out_tokens[j - 1];
        }
        out_scores[pos] = v;
        out_tokens[pos] = src_tokens[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_for(rows: usize, num_beams: usize) -> CpuTensor {
        CpuTensor::zeros(&[topk_scratch_len(rows, num_beams)], DType::F32)
    }

    /// Deterministic pseudo-random score matrix.
    fn pseudo_random(rows: usize, vocab: usize) -> Vec<f32> {
        let mut state = 0x2545_f491u64;
        let mut out = Vec::with_capacity(rows * vocab);
        for _ in 0..rows * vocab {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            out.push(((state >> 33) as u32 % 10_000) as f32 / 1_000.0 - 5.0);
        }
        out
    }

    #[test]
    fn test_argmax_multiple_rows() {
        let scores = CpuTensor::from_f32(
            &[3, 3],
            &[1.0, 5.0, 3.0, 9.0, 2.0, 4.0, 0.0, 0.0, 7.0],
        );
        assert_eq!(CpuBackend::argmax_rows(&scores).unwrap(), vec![1, 0, 2]);
    }

    #[test]
    fn test_argmax_negative_values() {
        let scores = CpuTensor::from_f32(&[1, 5], &[-10.0, -3.0, -5.0, -1.0, -8.0]);
        assert_eq!(CpuBackend::argmax_rows(&scores).unwrap(), vec![3]);
    }

    #[test]
    fn test_beam_topk_known_order() {
        // One batch item, two beams, vocab 4.
        let scores = CpuTensor::from_f32(
            &[2, 4],
            &[0.1, 3.0, -1.0, 2.0, 2.5, -2.0, 3.0, 0.0],
        );
        let mut scratch = scratch_for(2, 2);
        let cands = CpuBackend::beam_topk(&scores, &mut scratch, 1, 2, 4).unwrap();
        // 3.0 appears in both rows; row 0 wins the tie.
        assert_eq!(cands.scores, vec![3.0, 3.0, 2.5, 2.0]);
        assert_eq!(cands.tokens, vec![1, 2, 0, 3]);
        assert_eq!(cands.rows, vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_beam_topk_matches_direct_selection() {
        let batch_size = 2;
        let num_beams = 3;
        let vocab = 50;
        let rows = batch_size * num_beams;
        let k = 2 * num_beams;
        let data = pseudo_random(rows, vocab);
        let scores = CpuTensor::from_f32(&[rows, vocab], &data);
        let mut scratch = scratch_for(rows, num_beams);
        let cands = CpuBackend::beam_topk(&scores, &mut scratch, batch_size, num_beams, k).unwrap();

        for batch in 0..batch_size {
            let mut direct: Vec<f32> = (0..num_beams)
                .flat_map(|beam| {
                    let row = batch * num_beams + beam;
                    data[row * vocab..][..vocab].to_vec()
                })
                .collect();
            direct.sort_by(|a, b| b.total_cmp(a));

            let (got_scores, got_tokens, got_rows) = cands.batch(batch);
            for i in 0..k {
                assert_eq!(got_scores[i], direct[i]);
                // Each reported (row, token) must address its score.
                let row = got_rows[i] as usize;
                let token = got_tokens[i] as usize;
                assert!(row >= batch * num_beams && row < (batch + 1) * num_beams);
                assert_eq!(data[row * vocab + token], got_scores[i]);
            }
        }
    }

    #[test]
    fn test_beam_topk_spikes_across_partitions() {
        // Vocabulary wide enough for every one of the 128 partitions to
        // hold several tokens; spikes land in different partitions.
        let vocab = 300;
        let mut data = vec![-5.0f32; vocab];
        data[0] = 3.0;
        data[150] = 2.0;
        data[299] = 1.0;
        let scores = CpuTensor::from_f32(&[1, vocab], &data);
        let mut scratch = scratch_for(1, 1);
        let cands = CpuBackend::beam_topk(&scores, &mut scratch, 1, 1, 2).unwrap();
        assert_eq!(cands.tokens, vec![0, 150]);
        assert_eq!(cands.scores, vec![3.0, 2.0]);
    }

    #[test]
    fn test_beam_topk_rejects_too_many_beams() {
        let scores = CpuTensor::zeros(&[33, 4], DType::F32);
        let mut scratch = scratch_for(33, 33);
        let result = CpuBackend::beam_topk(&scores, &mut scratch, 1, 33, 4);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_beam_topk_rejects_small_scratch() {
        let scores = CpuTensor::zeros(&[2, 4], DType::F32);
        let mut scratch = CpuTensor::zeros(&[8], DType::F32);
        let result = CpuBackend::beam_topk(&scores, &mut scratch, 1, 2, 4);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_beam_topk_rejects_oversized_k() {
        let scores = CpuTensor::zeros(&[2, 4], DType::F32);
        let mut scratch = scratch_for(2, 2);
        let result = CpuBackend::beam_topk(&scores, &mut scratch, 1, 2, 5);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
