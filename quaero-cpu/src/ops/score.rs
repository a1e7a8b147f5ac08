//! Row-wise score transforms.

use std::collections::HashSet;

use quaero::backend::ScoreOps;
use quaero::tensor::Tensor;
use quaero::{DType, Error, Result};

use super::matrix_dims;
use crate::{CpuBackend, CpuTensor};

impl ScoreOps for CpuBackend {
    fn copy_last_logits(
        logits: &CpuTensor,
        input_length: usize,
        scores: &mut CpuTensor,
    ) -> Result<()> {
        let (rows, vocab) = matrix_dims(scores, DType::F32)?;
        if input_length == 0 || logits.numel() != rows * input_length * vocab {
            return Err(Error::ShapeMismatch {
                expected: vec![rows, input_length, vocab],
                got: logits.shape().to_vec(),
            });
        }
        let src = logits.as_f32_slice();
        let dst = scores.as_f32_slice_mut();
        for row in 0..rows {
            let from = row * input_length * vocab + (input_length - 1) * vocab;
            dst[row * vocab..][..vocab].copy_from_slice(&src[from..][..vocab]);
        }
        Ok(())
    }

    fn log_softmax_rows(scores: &mut CpuTensor) -> Result<()> {
        let (_, vocab) = matrix_dims(scores, DType::F32)?;
        for row in scores.as_f32_slice_mut().chunks_exact_mut(vocab) {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let sum: f32 = row.iter().map(|v| (v - max).exp()).sum();
            let log_sum = max + sum.ln();
            for v in row {
                *v -= log_sum;
            }
        }
        Ok(())
    }

    fn add_beam_scores(scores: &mut CpuTensor, beam_scores: &[f32]) -> Result<()> {
        let (rows, vocab) = matrix_dims(scores, DType::F32)?;
        if beam_scores.len() != rows {
            return Err(Error::ShapeMismatch {
                expected: vec![rows],
                got: vec![beam_scores.len()],
            });
        }
        for (row, &beam_score) in scores
            .as_f32_slice_mut()
            .chunks_exact_mut(vocab)
            .zip(beam_scores)
        {
            for v in row {
                *v += beam_score;
            }
        }
        Ok(())
    }

    fn repetition_penalty(
        scores: &mut CpuTensor,
        sequences: &CpuTensor,
        current_length: usize,
        penalty: f32,
    ) -> Result<()> {
        let (rows, vocab) = matrix_dims(scores, DType::F32)?;
        let (seq_rows, max_length) = matrix_dims(sequences, DType::U32)?;
        if seq_rows != rows || current_length > max_length {
            return Err(Error::ShapeMismatch {
                expected: vec![rows, current_length],
                got: vec![seq_rows, max_length],
            });
        }
        let history = sequences.as_u32_slice();
        let mut seen = HashSet::new();
        for (row_idx, row) in scores.as_f32_slice_mut().chunks_exact_mut(vocab).enumerate() {
            seen.clear();
            for &token in &history[row_idx * max_length..][..current_length] {
                // Each token id is penalized once per row, however often
                // it occurs in the history.
                if !seen.insert(token) {
                    continue;
                }
                let score = &mut row[token as usize];
                *score = if *score < 0.0 {
                    *score * penalty
                } else {
                    *score / penalty
                };
            }
        }
        Ok(())
    }

    fn fill_column(scores: &mut CpuTensor, column: usize, value: f32) -> Result<()> {
        let (_, vocab) = matrix_dims(scores, DType::F32)?;
        if column >= vocab {
            return Err(Error::InvalidArgument(format!(
                "column {column} outside vocabulary of size {vocab}"
            )));
        }
        for row in scores.as_f32_slice_mut().chunks_exact_mut(vocab) {
            row[column] = value;
        }
        Ok(())
    }
}
