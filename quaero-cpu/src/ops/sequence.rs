//! Sequence buffer primitives: append, gather-append, host read-back.

use quaero::backend::SequenceOps;
use quaero::{DType, Error, Result};

use super::matrix_dims;
use crate::{CpuBackend, CpuTensor};

impl SequenceOps for CpuBackend {
    fn append_tokens(seqs: &mut CpuTensor, column: usize, tokens: &[u32]) -> Result<()> {
        let (rows, max_length) = matrix_dims(seqs, DType::U32)?;
        if tokens.len() != rows || column >= max_length {
            return Err(Error::ShapeMismatch {
                expected: vec![rows, max_length],
                got: vec![tokens.len(), column],
            });
        }
        let data = seqs.as_u32_slice_mut();
        for (row, &token) in tokens.iter().enumerate() {
            data[row * max_length + column] = token;
        }
        Ok(())
    }

    fn gather_append(
        src: &CpuTensor,
        dst: &mut CpuTensor,
        column: usize,
        tokens: &[u32],
        rows: &[u32],
    ) -> Result<()> {
        let (src_rows, max_length) = matrix_dims(src, DType::U32)?;
        let (dst_rows, dst_length) = matrix_dims(dst, DType::U32)?;
        if src_rows != dst_rows
            || max_length != dst_length
            || tokens.len() != dst_rows
            || rows.len() != dst_rows
            || column >= max_length
        {
            return Err(Error::ShapeMismatch {
                expected: vec![src_rows, max_length],
                got: vec![dst_rows, dst_length, tokens.len(), rows.len()],
            });
        }
        let src_data = src.as_u32_slice();
        let dst_data = dst.as_u32_slice_mut();
        for (row, (&token, &source_row)) in tokens.iter().zip(rows).enumerate() {
            let source_row = source_row as usize;
            if source_row >= src_rows {
                return Err(Error::InvalidArgument(format!(
                    "source row {source_row} outside buffer of {src_rows} rows"
                )));
            }
            let out = &mut dst_data[row * max_length..][..max_length];
            out[..column].copy_from_slice(&src_data[source_row * max_length..][..column]);
            out[column] = token;
        }
        Ok(())
    }

    fn read_row(seqs: &CpuTensor, row: usize, len: usize) -> Result<Vec<u32>> {
        let (rows, max_length) = matrix_dims(seqs, DType::U32)?;
        if row >= rows || len > max_length {
            return Err(Error::InvalidArgument(format!(
                "row {row} len {len} outside buffer of {rows} rows x {max_length}"
            )));
        }
        Ok(seqs.as_u32_slice()[row * max_length..][..len].to_vec())
    }
}
