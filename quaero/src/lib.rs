//! Quaero: autoregressive token-generation search.
//!
//! This crate provides the search state machines (greedy and beam),
//! the sequence and score buffers backing them, score post-processors,
//! and the host-side beam scorer. It is generic over a [`backend`]
//! implementing the parallel primitives (log-softmax, arg-max, top-K,
//! penalty rescaling, sequence append/gather); backend implementations
//! live in separate crates.

pub mod backend;
pub mod beam;
pub mod beam_scorer;
pub mod config;
pub mod dtype;
pub mod error;
pub mod generator;
pub mod greedy;
pub mod params;
pub mod processors;
pub mod scores;
pub mod search;
pub mod sequences;
pub mod tensor;

pub use backend::{Backend, Candidates, ScoreOps, SearchBackend, SelectOps, SequenceOps};
pub use beam::BeamSearch;
pub use beam_scorer::BeamScorer;
pub use config::SearchConfig;
pub use dtype::DType;
pub use error::{Error, Result};
pub use generator::{generate, FinishReason, ForwardPass, GenerationOutput};
pub use greedy::GreedySearch;
pub use params::{SearchParams, MAX_NUM_BEAMS};
pub use processors::{MinLength, RepetitionPenalty, ScoreProcessor};
pub use scores::ScoreBuffer;
pub use search::Search;
pub use sequences::{SequenceView, Sequences};
pub use tensor::Tensor;
