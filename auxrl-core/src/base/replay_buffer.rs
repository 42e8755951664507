//! Replay buffer interface.
use anyhow::Result;

/// Interface for replay buffers that generate batches of contiguous
/// transition sequences for training.
///
/// Sampled sequences never cross an episode-start boundary at any index other
/// than their first element; implementations must track episode starts.
pub trait SequenceReplayBufferBase {
    /// Configuration of the buffer.
    type Config: Clone;

    /// A batched snapshot of transitions at one sequence offset.
    type Batch;

    /// Builds the buffer from the given configuration.
    fn build(config: &Self::Config) -> Self;

    /// Returns true iff at least `batch_size` valid starting offsets of
    /// length `seq_len` exist in the buffer.
    fn is_ready(&self, batch_size: usize, seq_len: usize) -> bool;

    /// Draws `batch_size` sequences of `seq_len` contiguous transitions,
    /// uniformly at random with replacement over valid starting offsets.
    ///
    /// The result holds `seq_len` aligned batches: index 0 is the oldest
    /// offset of the window, the last element the most recent. Sampling when
    /// [`Self::is_ready`] is false is a caller contract violation and returns
    /// an error.
    fn sample(&mut self, batch_size: usize, seq_len: usize) -> Result<Vec<Self::Batch>>;
}
