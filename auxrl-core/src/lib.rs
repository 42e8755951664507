#![warn(missing_docs)]
//! Core abstractions for latent-representation reinforcement learning.
pub mod error;
pub mod record;
pub mod replay_buffer;

mod base;
pub use base::{Act, Agent, Configurable, Env, Info, Obs, Policy, SequenceReplayBufferBase, Step};
