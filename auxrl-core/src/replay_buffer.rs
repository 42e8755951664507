//! A generic replay buffer storing sequences of transitions.
//!
//! [`SequenceReplayBuffer`] is a fixed-capacity ring of transitions with
//! per-slot episode-start tracking, so that sampled windows never cross an
//! episode boundary except at their first element. It is generic over the
//! columnar storage of observations, actions and latent snapshots via
//! [`BatchBase`], which keeps this crate independent of any tensor backend.
mod base;
mod batch;
mod config;
pub use base::SequenceReplayBuffer;
pub use batch::{BatchBase, TransitionBatch};
pub use config::SequenceReplayBufferConfig;
