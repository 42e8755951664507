//! Exploration strategies of the latent Q-learning agent.
use serde::{Deserialize, Serialize};
use tch::Tensor;

/// Explorers for [`LatentQ`](super::LatentQ).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum LatentQExplorer {
    /// Epsilon-greedy action selection with uniform random actions.
    EpsilonGreedy(EpsilonGreedy),

    /// Epsilon-greedy action selection where random actions are biased
    /// towards large predicted latent displacements.
    LatentShift(LatentShift),
}

/// Epsilon-greedy explorer with linearly annealed epsilon.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EpsilonGreedy {
    /// Number of optimization steps taken so far.
    pub n_opts: usize,
    /// Initial value of epsilon.
    pub eps_start: f64,
    /// Final value of epsilon.
    pub eps_final: f64,
    /// Optimization step at which annealing ends.
    pub final_step: usize,
}

#[allow(clippy::new_without_default)]
impl EpsilonGreedy {
    /// Constructs epsilon-greedy explorer.
    pub fn new() -> Self {
        Self {
            n_opts: 0,
            eps_start: 1.0,
            eps_final: 0.02,
            final_step: 100_000,
        }
    }

    /// Constructs epsilon-greedy explorer with the given annealing length.
    pub fn with_final_step(final_step: usize) -> LatentQExplorer {
        LatentQExplorer::EpsilonGreedy(Self {
            n_opts: 0,
            eps_start: 1.0,
            eps_final: 0.02,
            final_step,
        })
    }

    /// Takes an action based on action values.
    pub fn action(&mut self, a: &Tensor) -> Tensor {
        let d = (self.eps_start - self.eps_final) / (self.final_step as f64);
        let eps = (self.eps_start - d * self.n_opts as f64).max(self.eps_final);
        let r = fastrand::f64();
        let is_random = r < eps;
        self.n_opts += 1;

        if is_random {
            let n_procs = a.size()[0] as u32;
            let n_actions = a.size()[1] as u32;
            Tensor::from_slice(
                (0..n_procs)
                    .map(|_| fastrand::u32(..n_actions) as i64)
                    .collect::<Vec<_>>()
                    .as_slice(),
            )
            .unsqueeze(-1)
        } else {
            a.argmax(-1, true)
        }
    }

    /// Set the epsilon value at the final step.
    pub fn eps_final(self, v: f64) -> Self {
        let mut s = self;
        s.eps_final = v;
        s
    }

    /// Set the epsilon value at the start.
    pub fn eps_start(self, v: f64) -> Self {
        let mut s = self;
        s.eps_start = v;
        s
    }
}

/// Explorer whose random actions are drawn from a softmax over the L2 norms
/// of the latent displacements the transition predictor assigns to each
/// action, so exploration prefers actions expected to change the latent
/// state the most.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct LatentShift {
    /// Probability of taking the biased random action.
    pub epsilon: f64,
    /// Temperature of the softmax over displacement norms.
    pub temp: f64,
}

#[allow(clippy::new_without_default)]
impl LatentShift {
    /// Constructs the explorer.
    pub fn new() -> Self {
        Self {
            epsilon: 0.1,
            temp: 10.0,
        }
    }

    /// Takes an action based on action values and per-action latent
    /// displacement norms of shape `[1, n_actions]`.
    pub fn action(&mut self, a: &Tensor, shift_norms: &Tensor) -> Tensor {
        let r = fastrand::f64();
        if r < self.epsilon {
            (shift_norms * self.temp)
                .softmax(-1, tch::Kind::Float)
                .multinomial(1, true)
        } else {
            a.argmax(-1, true)
        }
    }

    /// Sets the probability of taking a random action.
    pub fn epsilon(mut self, v: f64) -> Self {
        self.epsilon = v;
        self
    }

    /// Sets the temperature of the softmax over displacement norms.
    pub fn temp(mut self, v: f64) -> Self {
        self.temp = v;
        self
    }
}
