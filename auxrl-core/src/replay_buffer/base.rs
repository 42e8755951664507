//! Sequence replay buffer.
use super::{BatchBase, SequenceReplayBufferConfig, TransitionBatch};
use crate::{error::AuxrlError, SequenceReplayBufferBase};
use anyhow::Result;
use log::trace;
use rand::{rngs::StdRng, RngCore, SeedableRng};

/// A ring-structured replay buffer of transitions with episode tracking.
///
/// Transitions are created on each environment step via [`Self::add_first`] /
/// [`Self::add`], are read-only afterwards and are overwritten on wraparound
/// once the buffer is full. The buffer records which slots begin an episode,
/// which allows sampling fixed-length contiguous sequences that never cross
/// an episode-start boundary except at their first element.
///
/// # Type Parameters
///
/// * `O` - Storage of observations.
/// * `A` - Storage of actions.
/// * `L` - Storage of latent memory snapshots, used for burn-in of
///   memory-augmented encoders.
pub struct SequenceReplayBuffer<O, A, L>
where
    O: BatchBase + Clone,
    A: BatchBase,
    L: BatchBase,
{
    capacity: usize,

    // Insertion position.
    i: usize,

    // Current number of stored transitions.
    size: usize,

    obs: O,
    act: A,
    next_obs: O,
    reward: Vec<f32>,
    is_terminal: Vec<i8>,
    latent: L,

    // True once any latent snapshot has been stored.
    has_latent: bool,

    // Per-slot flag marking the first transition of an episode.
    episode_start: Vec<i8>,

    // Observation of the upcoming transition, set by `add_first` and by the
    // `next_obs` of the previous `add`.
    pending_obs: Option<O>,

    // The next added transition begins a new episode.
    next_is_first: bool,

    rng: StdRng,
}

impl<O, A, L> SequenceReplayBuffer<O, A, L>
where
    O: BatchBase + Clone,
    A: BatchBase,
    L: BatchBase,
{
    /// Records the initial observation of a new episode.
    ///
    /// Resets any in-progress sequence tracking: the next [`Self::add`] call
    /// stores a transition marked as an episode start.
    pub fn add_first(&mut self, obs: O) {
        self.pending_obs = Some(obs);
        self.next_is_first = true;
    }

    /// Appends one step of experience.
    ///
    /// `latent`, when present, is the latent memory snapshot of the *prior*
    /// observation; it is stored for burn-in of memory-augmented encoders.
    /// Returns an error if no observation is pending, i.e. [`Self::add_first`]
    /// was not called at the start of the episode.
    pub fn add(
        &mut self,
        act: A,
        next_obs: O,
        reward: f32,
        is_terminal: bool,
        latent: Option<L>,
    ) -> Result<()> {
        let obs = self.pending_obs.take().ok_or(AuxrlError::NoPendingObs)?;
        self.pending_obs = Some(next_obs.clone());

        let i = self.i;
        self.obs.push(i, obs);
        self.act.push(i, act);
        self.next_obs.push(i, next_obs);
        self.reward[i] = reward;
        self.is_terminal[i] = is_terminal as i8;
        self.episode_start[i] = self.next_is_first as i8;
        if let Some(latent) = latent {
            self.latent.push(i, latent);
            self.has_latent = true;
        }
        self.next_is_first = false;

        self.i = (self.i + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        trace!("push transition at slot {}", i);

        Ok(())
    }

    /// Returns the current number of transitions in the buffer.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true if the buffer holds no transitions.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    // Physical slot of the c-th transition in chronological order
    // (c == 0 is the oldest stored transition).
    fn slot(&self, c: usize) -> usize {
        if self.size < self.capacity {
            c
        } else {
            (self.i + c) % self.capacity
        }
    }

    // Chronological starting offsets from which a window of `seq_len`
    // transitions does not cross an episode start except at its first
    // element.
    fn valid_offsets(&self, seq_len: usize) -> Vec<usize> {
        if seq_len == 0 || self.size < seq_len {
            return vec![];
        }
        (0..=self.size - seq_len)
            .filter(|&j| (1..seq_len).all(|k| self.episode_start[self.slot(j + k)] == 0))
            .collect()
    }
}

impl<O, A, L> SequenceReplayBufferBase for SequenceReplayBuffer<O, A, L>
where
    O: BatchBase + Clone,
    A: BatchBase,
    L: BatchBase,
{
    type Config = SequenceReplayBufferConfig;
    type Batch = TransitionBatch<O, A, L>;

    fn build(config: &Self::Config) -> Self {
        let capacity = config.capacity;
        Self {
            capacity,
            i: 0,
            size: 0,
            obs: O::new(capacity),
            act: A::new(capacity),
            next_obs: O::new(capacity),
            reward: vec![0.; capacity],
            is_terminal: vec![0; capacity],
            latent: L::new(capacity),
            has_latent: false,
            episode_start: vec![0; capacity],
            pending_obs: None,
            next_is_first: false,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    fn is_ready(&self, batch_size: usize, seq_len: usize) -> bool {
        self.valid_offsets(seq_len).len() >= batch_size
    }

    fn sample(&mut self, batch_size: usize, seq_len: usize) -> Result<Vec<Self::Batch>> {
        let offsets = self.valid_offsets(seq_len);
        if offsets.len() < batch_size {
            return Err(AuxrlError::NotReady {
                batch_size,
                seq_len,
                n_valid: offsets.len(),
            }
            .into());
        }

        // Uniform with replacement over valid starting offsets.
        let starts = (0..batch_size)
            .map(|_| offsets[(self.rng.next_u32() as usize) % offsets.len()])
            .collect::<Vec<_>>();

        let seq = (0..seq_len)
            .map(|t| {
                let ixs = starts.iter().map(|&s| self.slot(s + t)).collect::<Vec<_>>();
                TransitionBatch {
                    obs: self.obs.sample(&ixs),
                    act: self.act.sample(&ixs),
                    next_obs: self.next_obs.sample(&ixs),
                    reward: ixs.iter().map(|&ix| self.reward[ix]).collect(),
                    is_terminal: ixs.iter().map(|&ix| self.is_terminal[ix]).collect(),
                    latent: if self.has_latent {
                        Some(self.latent.sample(&ixs))
                    } else {
                        None
                    },
                }
            })
            .collect();

        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scalar-per-row storage, enough to exercise the ring logic.
    #[derive(Clone, Debug)]
    struct VecBatch(Vec<f32>);

    impl BatchBase for VecBatch {
        fn new(capacity: usize) -> Self {
            Self(vec![0.; capacity])
        }

        fn push(&mut self, ix: usize, data: Self) {
            let capacity = self.0.len();
            for (k, v) in data.0.iter().enumerate() {
                self.0[(ix + k) % capacity] = *v;
            }
        }

        fn sample(&self, ixs: &[usize]) -> Self {
            Self(ixs.iter().map(|&ix| self.0[ix]).collect())
        }
    }

    type Buffer = SequenceReplayBuffer<VecBatch, VecBatch, VecBatch>;

    fn row(v: f32) -> VecBatch {
        VecBatch(vec![v])
    }

    fn filled_buffer(capacity: usize, episode_lens: &[usize]) -> Buffer {
        let config = SequenceReplayBufferConfig::default()
            .capacity(capacity)
            .seed(0);
        let mut buffer = Buffer::build(&config);
        let mut v = 0.;
        for &len in episode_lens {
            buffer.add_first(row(v));
            for k in 0..len {
                let terminal = k == len - 1;
                buffer
                    .add(row(v), row(v + 1.), 0.1, terminal, None)
                    .unwrap();
                v += 1.;
            }
        }
        buffer
    }

    #[test]
    fn test_capacity_eviction() {
        // Capacity 10, 15 sequential transitions: the 10 most recent remain.
        let buffer = filled_buffer(10, &[15]);
        assert_eq!(buffer.len(), 10);

        let mut buffer = buffer;
        let batch = &buffer.sample(1, 1).unwrap()[0];
        // All sampled observations must come from the surviving range [5, 15).
        assert!(batch.obs.0[0] >= 5.0);
    }

    #[test]
    fn test_add_without_first_fails() {
        let config = SequenceReplayBufferConfig::default().capacity(4);
        let mut buffer = Buffer::build(&config);
        assert!(buffer.add(row(0.), row(1.), 0., false, None).is_err());
    }

    #[test]
    fn test_is_ready_counts_valid_offsets() {
        // Two episodes of length 3: windows of length 2 can start at
        // chronological offsets 0, 1, 3, 4 (offset 2 would span the episode
        // boundary at chronological index 3).
        let buffer = filled_buffer(100, &[3, 3]);
        assert_eq!(buffer.len(), 6);
        assert!(buffer.is_ready(4, 2));
        assert!(!buffer.is_ready(5, 2));

        // Windows of length 3 can start at offsets 0 and 3 only.
        assert!(buffer.is_ready(2, 3));
        assert!(!buffer.is_ready(3, 3));
    }

    #[test]
    fn test_sampled_windows_respect_episode_boundaries() {
        let mut buffer = filled_buffer(100, &[5, 5, 5]);
        for _ in 0..50 {
            let seq = buffer.sample(8, 3).unwrap();
            assert_eq!(seq.len(), 3);
            for b in 0..8 {
                // Observations within a window are consecutive, which fails
                // whenever a window crosses an episode start.
                let o0 = seq[0].obs.0[b];
                let o1 = seq[1].obs.0[b];
                let o2 = seq[2].obs.0[b];
                assert_eq!(o1, o0 + 1.);
                assert_eq!(o2, o1 + 1.);
                // A fresh episode never begins inside the window.
                assert!(o1 as usize % 5 != 0);
                assert!(o2 as usize % 5 != 0);
            }
        }
    }

    #[test]
    fn test_sample_when_not_ready_is_rejected() {
        let mut buffer = filled_buffer(100, &[2]);
        assert!(!buffer.is_ready(4, 2));
        assert!(buffer.sample(4, 2).is_err());
    }

    #[test]
    fn test_wraparound_keeps_chronological_order() {
        // 3 episodes of 4 in a buffer of 10: the oldest 2 transitions are
        // overwritten, the first surviving chronological slot is mid-episode.
        let mut buffer = filled_buffer(10, &[4, 4, 4]);
        assert_eq!(buffer.len(), 10);
        let seq = buffer.sample(16, 2).unwrap();
        for b in 0..16 {
            assert_eq!(seq[1].obs.0[b], seq[0].obs.0[b] + 1.);
        }
    }

    #[test]
    fn test_latents_surface_in_batches() {
        let config = SequenceReplayBufferConfig::default().capacity(8).seed(7);
        let mut buffer = Buffer::build(&config);
        buffer.add_first(row(0.));
        for k in 0..4 {
            let v = k as f32;
            buffer
                .add(row(v), row(v + 1.), 0., k == 3, Some(row(10. + v)))
                .unwrap();
        }
        let seq = buffer.sample(2, 1).unwrap();
        let latent = seq[0].latent.as_ref().unwrap();
        assert_eq!(latent.0.len(), 2);
        assert!(latent.0.iter().all(|&v| (10.0..14.0).contains(&v)));
    }
}
