//! End-to-end decoding runs against the CPU backend: scripted forward
//! passes drive the full step loop through the public driver.

use quaero::{
    generate, Error, FinishReason, ForwardPass, Result, Search, SearchConfig, SearchParams,
    SequenceView, Sequences,
};
use quaero_cpu::{CpuBackend, CpuTensor};

/// A model that always scores one fixed token highest.
struct ConstantModel {
    vocab_size: usize,
    favourite: usize,
}

impl ForwardPass<CpuBackend> for ConstantModel {
    fn forward(&mut self, sequences: &Sequences<CpuBackend>) -> Result<CpuTensor> {
        let rows = sequences.batch_beam_size();
        let mut logits = vec![0.0f32; rows * self.vocab_size];
        for row in 0..rows {
            logits[row * self.vocab_size + self.favourite] = 5.0;
        }
        Ok(CpuTensor::from_f32(&[rows, 1, self.vocab_size], &logits))
    }
}

/// Scores depend on each row's length and last committed token,
/// steering one beam into EOS while another runs to the length cap.
struct ForkingModel;

impl ForwardPass<CpuBackend> for ForkingModel {
    fn forward(&mut self, sequences: &Sequences<CpuBackend>) -> Result<CpuTensor> {
        let rows = sequences.batch_beam_size();
        let length = sequences.current_length();
        let mut logits = Vec::with_capacity(rows * 3);
        for row in 0..rows {
            let history = sequences.sequence(row)?;
            let last = *history.last().unwrap();
            let row_logits: [f32; 3] = if length == 1 {
                [2.0, 1.0, -5.0]
            } else if length == 2 && last == 0 {
                [-5.0, -5.0, 5.0]
            } else if length == 2 {
                [-5.0, 5.0, -5.0]
            } else if last == 1 {
                [0.0, 2.0, 1.0]
            } else {
                [1.0, 0.0, 0.0]
            };
            logits.extend_from_slice(&row_logits);
        }
        Ok(CpuTensor::from_f32(&[rows, 1, 3], &logits))
    }
}

fn greedy_params(eos_token_id: u32) -> SearchParams {
    SearchParams {
        batch_size: 1,
        num_beams: 1,
        vocab_size: 4,
        max_length: 3,
        min_length: 0,
        eos_token_id,
        pad_token_id: 3,
        repetition_penalty: 1.0,
        length_penalty: 1.0,
        early_stopping: false,
        num_return_sequences: 1,
        input_ids: vec![0],
        sequence_length: 1,
    }
}

fn beam_params() -> SearchParams {
    SearchParams {
        batch_size: 1,
        num_beams: 2,
        vocab_size: 3,
        max_length: 4,
        min_length: 0,
        eos_token_id: 2,
        pad_token_id: 0,
        repetition_penalty: 1.0,
        length_penalty: 1.0,
        early_stopping: false,
        num_return_sequences: 1,
        input_ids: vec![1],
        sequence_length: 1,
    }
}

#[test]
fn test_greedy_repeats_best_token_to_length_cap() {
    let mut search = Search::<CpuBackend>::new(greedy_params(1)).unwrap();
    let mut model = ConstantModel {
        vocab_size: 4,
        favourite: 2,
    };
    let output = generate(&mut search, &mut model, &[]).unwrap();
    assert_eq!(output.sequences, vec![vec![0, 2, 2]]);
    assert_eq!(output.finish_reason, FinishReason::Length);
}

#[test]
fn test_greedy_stops_early_when_best_token_is_eos() {
    let mut search = Search::<CpuBackend>::new(greedy_params(2)).unwrap();
    let mut model = ConstantModel {
        vocab_size: 4,
        favourite: 2,
    };
    let output = generate(&mut search, &mut model, &[]).unwrap();
    // The EOS selection is rewritten to padding before it is committed.
    assert_eq!(output.sequences, vec![vec![0, 3, 3]]);
    assert_eq!(output.finish_reason, FinishReason::Stop);
}

#[test]
fn test_beam_search_returns_early_finished_hypothesis() {
    let mut search = Search::<CpuBackend>::new(beam_params()).unwrap();
    let output = generate(&mut search, &mut ForkingModel, &[]).unwrap();
    // One beam reached EOS after two tokens; its length-normalized
    // score beats every hypothesis that ran to the cap.
    assert_eq!(output.sequences, vec![vec![1, 0, 0, 0]]);
    assert!((output.scores[0] - (-0.157)).abs() < 1e-3);
    assert_eq!(output.finish_reason, FinishReason::Length);
}

#[test]
fn test_beam_search_is_deterministic() {
    let run = || {
        let mut search = Search::<CpuBackend>::new(beam_params()).unwrap();
        generate(&mut search, &mut ForkingModel, &[]).unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.sequences, b.sequences);
    assert_eq!(a.scores, b.scores);
}

#[test]
fn test_input_is_replayed_into_every_beam_row() {
    let mut params = beam_params();
    params.input_ids = vec![1, 2];
    params.sequence_length = 2;
    params.max_length = 5;
    let search = Search::<CpuBackend>::new(params).unwrap();
    for row in 0..2 {
        assert_eq!(search.sequences().sequence(row).unwrap(), vec![1, 2]);
    }
}

#[test]
fn test_sequence_buffer_rejects_append_past_capacity() {
    let mut params = greedy_params(1);
    params.max_length = 2;
    let mut sequences = Sequences::<CpuBackend>::new(&params).unwrap();
    sequences.append(&[2]).unwrap();
    assert_eq!(sequences.current_length(), 2);
    let result = sequences.append(&[2]);
    assert!(matches!(result, Err(Error::SequenceCapacity { .. })));
}

#[test]
fn test_set_logits_rejects_multi_position_logits() {
    let mut search = Search::<CpuBackend>::new(greedy_params(1)).unwrap();
    let logits = CpuTensor::from_f32(&[1, 2, 4], &[0.0; 8]);
    let result = search.set_logits(&logits);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_config_driven_generation() {
    let config = SearchConfig::from_json(
        r#"{"max_length": 3, "eos_token_id": 1, "pad_token_id": 3}"#,
    )
    .unwrap();
    let params = config.into_params(4, 1, vec![0]).unwrap();
    let mut search = Search::<CpuBackend>::new(params).unwrap();
    let mut model = ConstantModel {
        vocab_size: 4,
        favourite: 2,
    };
    let output = generate(&mut search, &mut model, &[]).unwrap();
    assert_eq!(output.sequences, vec![vec![0, 2, 2]]);
}
