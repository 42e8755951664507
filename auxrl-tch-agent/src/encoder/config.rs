use serde::{Deserialize, Serialize};

/// Configuration of [`Encoder`](super::Encoder).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EncoderConfig {
    /// Dimension of flattened observations.
    pub in_dim: i64,
    /// Sizes of hidden layers of the observation network.
    pub units: Vec<i64>,
    /// Dimension of the latent representation.
    pub latent_dim: i64,
    /// Number of past latents held in the memory window. Zero disables memory.
    pub mem_len: i64,
}

impl EncoderConfig {
    /// Creates a memoryless encoder configuration.
    pub fn new(in_dim: i64, units: Vec<i64>, latent_dim: i64) -> Self {
        Self {
            in_dim,
            units,
            latent_dim,
            mem_len: 0,
        }
    }

    /// Sets the length of the latent memory window.
    pub fn mem_len(mut self, v: i64) -> Self {
        self.mem_len = v;
        self
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            in_dim: 0,
            units: vec![128, 128],
            latent_dim: 32,
            mem_len: 0,
        }
    }
}
