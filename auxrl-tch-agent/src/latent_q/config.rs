//! Configuration of the latent Q-learning agent.
use super::{
    explorer::{EpsilonGreedy, LatentQExplorer},
    head::ValueHeadConfig,
};
use crate::{encoder::EncoderConfig, mlp::MlpConfig, opt::OptimizerConfig, Device};
use anyhow::Result;
use auxrl_core::error::AuxrlError;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`LatentModel`](super::LatentModel).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct LatentModelConfig {
    /// Configuration of the observation encoder.
    pub encoder_config: EncoderConfig,
    /// Configuration of the value head.
    pub head_config: ValueHeadConfig,
    /// Configuration of the transition predictor. Its input dimension must be
    /// `latent_dim + n_actions`, its output dimension `latent_dim`.
    pub trans_config: MlpConfig,
    /// Configuration of the optimizer.
    pub opt_config: OptimizerConfig,
}

impl LatentModelConfig {
    /// Creates a model configuration with the default optimizer.
    pub fn new(
        encoder_config: EncoderConfig,
        head_config: ValueHeadConfig,
        trans_config: MlpConfig,
    ) -> Self {
        Self {
            encoder_config,
            head_config,
            trans_config,
            opt_config: OptimizerConfig::default(),
        }
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }
}

impl Default for LatentModelConfig {
    fn default() -> Self {
        let encoder_config = EncoderConfig::default();
        let latent_dim = encoder_config.latent_dim;
        Self {
            encoder_config,
            head_config: ValueHeadConfig::scalar(latent_dim, vec![], 1),
            trans_config: MlpConfig::new("transition", latent_dim + 1, vec![], latent_dim),
            opt_config: OptimizerConfig::default(),
        }
    }
}

/// Weights of the four loss terms of [`LatentQ`](super::LatentQ).
///
/// The default trains the value head only.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct LossWeights {
    /// Weight of the transition prediction loss.
    pub pos_sample: f64,
    /// Weight of the loss pulling consecutive latents apart.
    pub neg_neighbor: f64,
    /// Weight of the loss pulling unrelated latents apart.
    pub neg_random: f64,
    /// Weight of the temporal-difference loss.
    pub value: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            pos_sample: 0.0,
            neg_neighbor: 0.0,
            neg_random: 0.0,
            value: 1.0,
        }
    }
}

impl LossWeights {
    /// Creates loss weights in the order `(pos_sample, neg_neighbor,
    /// neg_random, value)`.
    pub fn new(pos_sample: f64, neg_neighbor: f64, neg_random: f64, value: f64) -> Self {
        Self {
            pos_sample,
            neg_neighbor,
            neg_random,
            value,
        }
    }
}

/// Configuration of [`LatentQ`](super::LatentQ).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct LatentQConfig {
    pub(super) model_config: LatentModelConfig,
    pub(super) loss_weights: LossWeights,
    pub(super) batch_size: usize,
    pub(super) train_seq_len: usize,
    #[serde(default)]
    pub(super) pred_td: bool,
    pub(super) pred_gamma: f64,
    pub(super) discount_factor: f64,
    pub(super) target_update_interval: usize,
    pub(super) entropy_temp: f64,
    #[serde(default)]
    pub(super) clip_grad_norm: Option<f64>,
    pub(super) explorer: LatentQExplorer,
    pub(super) train: bool,
    /// Device on which the model is built.
    pub device: Option<Device>,
}

impl Default for LatentQConfig {
    fn default() -> Self {
        Self {
            model_config: Default::default(),
            loss_weights: Default::default(),
            batch_size: 32,
            train_seq_len: 1,
            pred_td: false,
            pred_gamma: 0.99,
            discount_factor: 0.99,
            target_update_interval: 1000,
            entropy_temp: 5.0,
            clip_grad_norm: None,
            explorer: LatentQExplorer::EpsilonGreedy(EpsilonGreedy::new()),
            train: false,
            device: None,
        }
    }
}

impl LatentQConfig {
    /// Sets the configuration of the model.
    pub fn model_config(mut self, v: LatentModelConfig) -> Self {
        self.model_config = v;
        self
    }

    /// Sets the weights of the loss terms.
    pub fn loss_weights(mut self, v: LossWeights) -> Self {
        self.loss_weights = v;
        self
    }

    /// Batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Number of consecutive transitions drawn per training sequence when the
    /// encoder carries memory.
    pub fn train_seq_len(mut self, v: usize) -> Self {
        self.train_seq_len = v;
        self
    }

    /// Bootstraps the transition prediction target with the predictor itself.
    pub fn pred_td(mut self, v: bool) -> Self {
        self.pred_td = v;
        self
    }

    /// Discount factor of the bootstrapped transition prediction target.
    pub fn pred_gamma(mut self, v: f64) -> Self {
        self.pred_gamma = v;
        self
    }

    /// Discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.discount_factor = v;
        self
    }

    /// Number of optimization steps between target network synchronizations.
    pub fn target_update_interval(mut self, v: usize) -> Self {
        self.target_update_interval = v;
        self
    }

    /// Temperature of the exponential latent similarity penalties.
    pub fn entropy_temp(mut self, v: f64) -> Self {
        self.entropy_temp = v;
        self
    }

    /// Maximum gradient norm of the encoder variables.
    pub fn clip_grad_norm(mut self, v: Option<f64>) -> Self {
        self.clip_grad_norm = v;
        self
    }

    /// Explorer.
    pub fn explorer(mut self, v: LatentQExplorer) -> Self {
        self.explorer = v;
        self
    }

    /// Training mode.
    pub fn train(mut self, v: bool) -> Self {
        self.train = v;
        self
    }

    /// Device.
    pub fn device(mut self, device: tch::Device) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Checks that the configuration is internally consistent.
    pub fn validate(&self) -> Result<()> {
        let mem_len = self.model_config.encoder_config.mem_len;

        if self.batch_size == 0 {
            return Err(AuxrlError::InvalidConfig("batch_size must be positive".into()).into());
        }

        if self.pred_td && mem_len > 0 {
            return Err(AuxrlError::InvalidConfig(
                "pred_td cannot be combined with a memory encoder".into(),
            )
            .into());
        }

        if mem_len > 0 && (self.train_seq_len as i64) < mem_len {
            return Err(AuxrlError::InvalidConfig(format!(
                "train_seq_len ({}) must be at least mem_len ({})",
                self.train_seq_len, mem_len
            ))
            .into());
        }

        let w = &self.loss_weights;
        if w.pos_sample < 0.0 || w.neg_neighbor < 0.0 || w.neg_random < 0.0 || w.value < 0.0 {
            return Err(AuxrlError::InvalidConfig("loss weights must be non-negative".into()).into());
        }

        if let ValueHeadConfig::Quantile(c) = &self.model_config.head_config {
            if c.n_quantiles <= 0 {
                return Err(
                    AuxrlError::InvalidConfig("n_quantiles must be positive".into()).into(),
                );
            }
        }

        Ok(())
    }

    /// Loads [`LatentQConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of latent Q agent from {}", path_.to_str().unwrap());
        Ok(b)
    }

    /// Saves [`LatentQConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of latent Q agent into {}", path_.to_str().unwrap());
        Ok(())
    }
}
