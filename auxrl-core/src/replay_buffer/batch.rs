//! Columnar storage and batched transitions.

/// Basic operations of columnar storage for one field of a transition.
///
/// A `BatchBase` holds up to `capacity` rows and supports writing a block of
/// rows at an index and gathering rows at arbitrary indices.
pub trait BatchBase {
    /// Creates a new storage with the given capacity.
    fn new(capacity: usize) -> Self;

    /// Writes `data` starting at index `ix`, wrapping around at capacity.
    fn push(&mut self, ix: usize, data: Self);

    /// Gathers the rows at the given indices.
    fn sample(&self, ixs: &[usize]) -> Self;
}

/// A batched snapshot of transitions at one sequence offset.
///
/// Produced by [`SequenceReplayBuffer::sample`](super::SequenceReplayBuffer::sample);
/// row `i` of every field belongs to the `i`-th sampled sequence.
pub struct TransitionBatch<O, A, L> {
    /// Observations `o_t`.
    pub obs: O,

    /// Actions `a_t`.
    pub act: A,

    /// Next observations `o_t+1`.
    pub next_obs: O,

    /// Rewards `r_t`.
    pub reward: Vec<f32>,

    /// Flags denoting if the episode terminated at this step.
    pub is_terminal: Vec<i8>,

    /// Latent memory snapshots of the observation at time `t`, present when
    /// the agent stores them for burn-in.
    pub latent: Option<L>,
}

impl<O, A, L> TransitionBatch<O, A, L> {
    /// Unpacks the data `(o_t, a_t, o_t+1, r_t, is_terminal_t, latent_t)`.
    #[allow(clippy::type_complexity)]
    pub fn unpack(self) -> (O, A, O, Vec<f32>, Vec<i8>, Option<L>) {
        (
            self.obs,
            self.act,
            self.next_obs,
            self.reward,
            self.is_terminal,
            self.latent,
        )
    }

    /// Returns the number of transitions in the batch.
    pub fn len(&self) -> usize {
        self.reward.len()
    }

    /// Returns true if the batch holds no transitions.
    pub fn is_empty(&self) -> bool {
        self.reward.is_empty()
    }
}
