use crate::util::OutDim;
use serde::{Deserialize, Serialize};

/// Configuration of [`Mlp`](super::Mlp).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct MlpConfig {
    /// Name of the network, used as the path prefix of its variables.
    ///
    /// Networks built on the same [`VarStore`](tch::nn::VarStore) must have
    /// distinct names.
    pub(crate) name: String,
    pub(crate) in_dim: i64,
    pub(crate) units: Vec<i64>,
    pub(crate) out_dim: i64,
    pub(crate) activation_out: bool,
}

impl MlpConfig {
    /// Creates a configuration of a multilayer perceptron.
    pub fn new(name: impl Into<String>, in_dim: i64, units: Vec<i64>, out_dim: i64) -> Self {
        Self {
            name: name.into(),
            in_dim,
            units,
            out_dim,
            activation_out: false,
        }
    }

    /// Applies ReLU to the output layer.
    pub fn activation_out(mut self, v: bool) -> Self {
        self.activation_out = v;
        self
    }
}

impl OutDim for MlpConfig {
    fn get_out_dim(&self) -> i64 {
        self.out_dim
    }

    fn set_out_dim(&mut self, out_dim: i64) {
        self.out_dim = out_dim;
    }
}
