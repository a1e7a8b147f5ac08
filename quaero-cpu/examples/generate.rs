//! Beam-search decoding over a toy bigram model.
//!
//! Usage:
//!   cargo run -p quaero-cpu --example generate
//!   cargo run -p quaero-cpu --example generate -- 8

use std::env;

use quaero::{generate, processors, ForwardPass, Result, Search, SearchConfig, Sequences};
use quaero::SequenceView;
use quaero_cpu::{CpuBackend, CpuTensor};

const VOCAB_SIZE: usize = 8;
const EOS_TOKEN: u32 = 7;

/// Prefers to follow each token with its successor id, with an EOS pull
/// that grows as sequences get longer.
struct BigramModel;

impl ForwardPass<CpuBackend> for BigramModel {
    fn forward(&mut self, sequences: &Sequences<CpuBackend>) -> Result<CpuTensor> {
        let rows = sequences.batch_beam_size();
        #[allow(clippy::cast_precision_loss)]
        let length = sequences.current_length() as f32;
        let mut logits = vec![0.0f32; rows * VOCAB_SIZE];
        for row in 0..rows {
            let last = *sequences.sequence(row)?.last().unwrap() as usize;
            let row_logits = &mut logits[row * VOCAB_SIZE..][..VOCAB_SIZE];
            row_logits[(last + 1) % (VOCAB_SIZE - 1)] = 4.0;
            row_logits[EOS_TOKEN as usize] = 0.6 * length;
        }
        Ok(CpuTensor::from_f32(&[rows, 1, VOCAB_SIZE], &logits))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let num_beams: usize = env::args()
        .nth(1)
        .map(|arg| arg.parse().expect("num_beams must be a number"))
        .unwrap_or(4);

    let num_return_sequences = num_beams.min(2);
    let config = SearchConfig::from_json(&format!(
        r#"{{
            "max_length": 12,
            "min_length": 4,
            "num_beams": {num_beams},
            "repetition_penalty": 1.3,
            "num_return_sequences": {num_return_sequences},
            "eos_token_id": {EOS_TOKEN},
            "pad_token_id": 0
        }}"#
    ))?;
    let params = config.into_params(VOCAB_SIZE, 1, vec![1, 2])?;
    println!(
        "Decoding with {} beams, max_length {}",
        params.num_beams, params.max_length
    );

    let pipeline = processors::from_params::<CpuBackend>(&params);
    let mut search = Search::<CpuBackend>::new(params)?;
    let output = generate(&mut search, &mut BigramModel, &pipeline)?;

    for (sequence, score) in output.sequences.iter().zip(&output.scores) {
        println!("score {score:8.4}  tokens {sequence:?}");
    }
    println!("finished: {:?}", output.finish_reason);
    Ok(())
}
