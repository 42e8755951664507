//! Networks of the latent Q-learning agent.
use super::{config::LatentModelConfig, head::ValueHead};
use crate::{
    encoder::Encoder,
    mlp::Mlp,
    model::{ModelBase, SubModel2},
    opt::Optimizer,
    util::clip_grad_norm,
};
use anyhow::Result;
use auxrl_core::record::Record;
use log::{info, trace};
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

/// The networks trained jointly by [`LatentQ`](super::LatentQ): an observation
/// [`Encoder`], a [`ValueHead`] and a transition predictor, all sharing one
/// variable store so a target copy can be made with a single [`Clone`].
pub struct LatentModel {
    device: Device,
    var_store: nn::VarStore,
    config: LatentModelConfig,
    n_actions: i64,

    /// Maps observations to latents.
    pub encoder: Encoder,

    /// Action values on latents.
    pub head: ValueHead,

    /// Predicts the next latent from a latent and a one-hot action.
    pub trans: Mlp,

    opt: Optimizer,
}

impl LatentModel {
    /// Constructs the model on the given device.
    pub fn build(config: LatentModelConfig, device: Device) -> Result<Self> {
        let var_store = nn::VarStore::new(device);
        let n_actions = config.head_config.n_actions();
        let encoder = Encoder::build(&var_store, config.encoder_config.clone());
        let head = ValueHead::build(&var_store, config.head_config.clone());
        let trans = <Mlp as SubModel2>::build(&var_store, config.trans_config.clone());
        let opt = config.opt_config.build(&var_store)?;

        Ok(Self {
            device,
            var_store,
            config,
            n_actions,
            encoder,
            head,
            trans,
            opt,
        })
    }

    /// Returns the number of actions.
    pub fn n_actions(&self) -> i64 {
        self.n_actions
    }

    /// Backward pass and parameter update, optionally rescaling the gradients
    /// of the encoder so their global norm stays below `clip`.
    pub fn backward_step_clipped(&mut self, loss: &Tensor, clip: Option<f64>) {
        self.opt.zero_grad();
        loss.backward();

        if let Some(max_norm) = clip {
            let vars = self.var_store.variables();
            let encoder_vars = vars
                .iter()
                .filter(|(k, _)| k.starts_with("encoder"))
                .map(|(_, v)| v.shallow_clone())
                .collect::<Vec<_>>();
            clip_grad_norm(&encoder_vars, max_norm);
        }

        self.opt.step();
    }

    /// L2 norms of the predicted latent displacement of every action.
    ///
    /// `z` has shape `[1, latent_dim]`; the result has shape
    /// `[1, n_actions]`.
    pub fn latent_shift_norms(&self, z: &Tensor) -> Tensor {
        let z = z.to(self.device);
        let z_rep = z.repeat([self.n_actions, 1]);
        let acts = Tensor::eye(self.n_actions, (Kind::Float, self.device));
        let tz = SubModel2::forward(&self.trans, &z_rep, &acts);

        (tz - z_rep)
            .square()
            .sum_dim_intlist([1i64].as_slice(), false, Kind::Float)
            .sqrt()
            .unsqueeze(0)
    }

    /// Overwrites the encoder variables with those stored at `path`.
    ///
    /// Entries whose name does not start with `encoder` are ignored, so a
    /// checkpoint written by [`ModelBase::save`] can be reused as a frozen
    /// representation. With `shuffle`, each loaded tensor is randomly permuted
    /// elementwise, which keeps the weight distribution but destroys the
    /// learned structure; useful as a control in representation analyses.
    pub fn load_encoder<T: AsRef<Path>>(&mut self, path: T, shuffle: bool) -> Result<()> {
        let named = Tensor::load_multi_with_device(&path, self.device)?;
        let mut vars = self.var_store.variables();

        tch::no_grad(|| {
            for (name, src) in named.iter() {
                if !name.starts_with("encoder") {
                    continue;
                }
                if let Some(dest) = vars.get_mut(name) {
                    let src = match shuffle {
                        true => {
                            let flat = src.flatten(0, -1);
                            let perm = Tensor::randperm(
                                flat.size()[0],
                                (Kind::Int64, self.device),
                            );
                            flat.index_select(0, &perm).reshape(src.size())
                        }
                        false => src.shallow_clone(),
                    };
                    dest.copy_(&src);
                }
            }
        });
        info!("Load encoder variables from {:?}", path.as_ref());

        Ok(())
    }

    /// Returns the mean and standard deviation of all parameters.
    pub fn param_stats(&self) -> Record {
        crate::util::param_stats(&self.var_store)
    }
}

impl Clone for LatentModel {
    fn clone(&self) -> Self {
        let device = self.device;
        let config = self.config.clone();
        let n_actions = self.n_actions;
        let mut var_store = nn::VarStore::new(device);

        let encoder = self.encoder.clone_with_var_store(&var_store);
        let head = self.head.clone_with_var_store(&var_store);
        let trans = SubModel2::clone_with_var_store(&self.trans, &var_store);
        let opt = config.opt_config.build(&var_store).unwrap();

        var_store.copy(&self.var_store).unwrap();

        Self {
            device,
            var_store,
            config,
            n_actions,
            encoder,
            head,
            trans,
            opt,
        }
    }
}

impl ModelBase for LatentModel {
    fn backward_step(&mut self, loss: &Tensor) {
        self.opt.backward_step(loss);
    }

    fn get_var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.var_store
    }

    fn get_var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.var_store.save(&path)?;
        info!("Save latent model to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    /// Loads all variables. When the direct load fails, e.g. for a
    /// checkpoint written on another device, the tensors are read on the CPU
    /// and copied over individually.
    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        if let Err(err) = self.var_store.load(&path) {
            info!("Direct load failed ({}), retrying through the CPU", err);
            let named = Tensor::load_multi_with_device(&path, tch::Device::Cpu)?;
            let mut vars = self.var_store.variables();
            tch::no_grad(|| {
                for (name, src) in named.iter() {
                    if let Some(dest) = vars.get_mut(name) {
                        dest.copy_(&src.to(self.device));
                    }
                }
            });
        }
        info!("Load latent model from {:?}", path.as_ref());
        Ok(())
    }
}
