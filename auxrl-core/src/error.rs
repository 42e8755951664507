//! Errors in the library.
use thiserror::Error;

/// Errors raised by this library.
#[derive(Debug, Error)]
pub enum AuxrlError {
    /// The replay buffer cannot serve the requested sample yet.
    #[error(
        "replay buffer is not ready: requested {batch_size} sequences of length {seq_len}, \
         but only {n_valid} valid starting offsets exist"
    )]
    NotReady {
        /// Number of sequences requested.
        batch_size: usize,
        /// Length of each requested sequence.
        seq_len: usize,
        /// Number of valid starting offsets currently in the buffer.
        n_valid: usize,
    },

    /// `add` was called without a preceding `add_first`.
    #[error("no pending observation: add_first() must be called at the start of an episode")]
    NoPendingObs,

    /// Invalid agent or model configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A tensor had an unexpected shape before loss aggregation.
    #[error("unexpected tensor shape: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// The shape required at this point.
        expected: Vec<i64>,
        /// The shape actually observed.
        got: Vec<i64>,
    },

    /// A sampled transition carries no stored latent snapshot.
    #[error(
        "sampled transition carries no latent snapshot; \
         memory encoders require rollouts that store them"
    )]
    MissingLatent,

    /// A record key was looked up with the wrong value type.
    #[error("record value of key {0} has an unexpected type")]
    RecordValueType(String),

    /// A record key was not found.
    #[error("record key {0} not found")]
    RecordKeyNotFound(String),
}
