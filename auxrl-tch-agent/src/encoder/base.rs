use super::EncoderConfig;
use crate::{
    mlp::{Mlp, MlpConfig},
    model::SubModel,
};
use std::cell::RefCell;
use tch::{nn::VarStore, Device, Kind, Tensor};

/// Maps observations to latent representations.
///
/// When `mem_len` of the configuration is positive, the encoder keeps a
/// sliding window of its own past latents and combines it with the current
/// observation features through a second network. The window held internally
/// is used during rollouts; training passes an explicit window instead.
pub struct Encoder {
    config: EncoderConfig,
    device: Device,
    obs_net: Mlp,
    mem_net: Option<Mlp>,
    mem: RefCell<Option<Tensor>>,
}

impl Encoder {
    fn obs_net_config(config: &EncoderConfig) -> MlpConfig {
        MlpConfig::new(
            "encoder_obs",
            config.in_dim,
            config.units.clone(),
            config.latent_dim,
        )
    }

    fn mem_net_config(config: &EncoderConfig) -> MlpConfig {
        let in_dim = config.latent_dim * (1 + config.mem_len);
        MlpConfig::new("encoder_mem", in_dim, vec![], config.latent_dim)
    }

    /// Constructs an encoder on the given variable store.
    pub fn build(var_store: &VarStore, config: EncoderConfig) -> Self {
        let device = var_store.device();
        let obs_net = <Mlp as SubModel>::build(var_store, Self::obs_net_config(&config));
        let mem_net = match config.mem_len > 0 {
            true => Some(<Mlp as SubModel>::build(
                var_store,
                Self::mem_net_config(&config),
            )),
            false => None,
        };

        Self {
            config,
            device,
            obs_net,
            mem_net,
            mem: RefCell::new(None),
        }
    }

    /// Creates a copy of the encoder whose variables live on another store.
    pub fn clone_with_var_store(&self, var_store: &VarStore) -> Self {
        Self::build(var_store, self.config.clone())
    }

    /// Returns the configured latent dimension.
    pub fn latent_dim(&self) -> i64 {
        self.config.latent_dim
    }

    /// Returns the configured memory window length.
    pub fn mem_len(&self) -> i64 {
        self.config.mem_len
    }

    /// Encodes a batch of observations.
    ///
    /// `prev_latents` of shape `[batch, mem_len, latent_dim]` overrides the
    /// internal memory window; passing it leaves the internal window
    /// untouched. Without it, the internal window (zeros at the start of an
    /// episode) is used and then advanced with the detached result.
    pub fn forward(&self, obs: &Tensor, prev_latents: Option<&Tensor>) -> Tensor {
        let obs = obs.to(self.device);
        let feat = SubModel::forward(&self.obs_net, &obs.flatten(1, -1));

        let mem_net = match &self.mem_net {
            Some(net) => net,
            None => return feat,
        };

        let batch_size = feat.size()[0];
        match prev_latents {
            Some(window) => {
                let window = window.to(self.device);
                let input = Tensor::cat(&[&feat, &window.reshape([batch_size, -1])], -1);
                SubModel::forward(mem_net, &input)
            }
            None => {
                let window = match self.mem.borrow().as_ref() {
                    Some(w) => w.shallow_clone(),
                    None => Tensor::zeros(
                        [batch_size, self.config.mem_len, self.config.latent_dim],
                        (Kind::Float, self.device),
                    ),
                };
                let input = Tensor::cat(&[&feat, &window.reshape([batch_size, -1])], -1);
                let z = SubModel::forward(mem_net, &input);

                // Drop the oldest latent and append the new one.
                let next_window = Tensor::cat(
                    &[
                        window.narrow(1, 1, self.config.mem_len - 1),
                        z.detach().unsqueeze(1),
                    ],
                    1,
                );
                self.mem.replace(Some(next_window));

                z
            }
        }
    }

    /// Returns the internal memory window, if the encoder has produced one
    /// since the last reset.
    pub fn memory(&self) -> Option<Tensor> {
        self.mem.borrow().as_ref().map(|w| w.shallow_clone())
    }

    /// Clears the internal memory window. Called at episode boundaries.
    pub fn reset(&self) {
        self.mem.replace(None);
    }
}
