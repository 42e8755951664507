//! Configuration of the sequence replay buffer.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`SequenceReplayBuffer`](super::SequenceReplayBuffer).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SequenceReplayBufferConfig {
    /// Maximum number of transitions in the buffer.
    pub capacity: usize,

    /// Random seed for sampling.
    pub seed: u64,
}

impl Default for SequenceReplayBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            seed: 42,
        }
    }
}

impl SequenceReplayBufferConfig {
    /// Sets the capacity of the buffer.
    pub fn capacity(mut self, v: usize) -> Self {
        self.capacity = v;
        self
    }

    /// Sets the random seed for sampling.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Loads the configuration from the YAML file of the given path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to the YAML file of the given path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
