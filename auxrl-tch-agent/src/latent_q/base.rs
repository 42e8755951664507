//! Q-learning agent acting on latent representations, implemented with tch-rs.
use super::{
    config::{LatentQConfig, LossWeights},
    explorer::LatentQExplorer,
    model::LatentModel,
};
use crate::{
    encoder::Encoder,
    model::{ModelBase, SubModel2},
    tensor_batch::TensorBatch,
};
use anyhow::Result;
use auxrl_core::{
    error::AuxrlError,
    record::{Record, RecordValue},
    replay_buffer::TransitionBatch,
    Agent, Configurable, Env, Policy, SequenceReplayBufferBase,
};
use log::info;
use std::{convert::TryFrom, fs, marker::PhantomData, path::Path};
use tch::{no_grad, Device, Kind::Float, Reduction, Tensor};

type Batch = TransitionBatch<TensorBatch, TensorBatch, TensorBatch>;

/// An agent that learns a latent representation of observations jointly with
/// action values on that representation.
///
/// Four loss terms are combined with configurable weights: a transition
/// prediction loss tying `T(z_t, a_t)` to `z_t+1`, two exponential penalties
/// discouraging latent collapse (against the following latent and against a
/// shuffled pairing within the batch), and a double Q-learning
/// temporal-difference loss evaluated with a periodically synchronized target
/// copy of the whole model.
pub struct LatentQ<E, R>
where
    E: Env,
    R: SequenceReplayBufferBase<Batch = Batch>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
{
    pub(in crate::latent_q) model: LatentModel,
    pub(in crate::latent_q) model_tgt: LatentModel,
    pub(in crate::latent_q) n_updates: usize,
    pub(in crate::latent_q) batch_size: usize,
    pub(in crate::latent_q) replay_seq_len: usize,
    pub(in crate::latent_q) mem_len: i64,
    pub(in crate::latent_q) pred_td: bool,
    pub(in crate::latent_q) pred_gamma: f64,
    pub(in crate::latent_q) discount_factor: f64,
    pub(in crate::latent_q) loss_weights: LossWeights,
    pub(in crate::latent_q) entropy_temp: f64,
    pub(in crate::latent_q) clip_grad_norm: Option<f64>,
    pub(in crate::latent_q) target_update_interval: usize,
    pub(in crate::latent_q) train: bool,
    pub(in crate::latent_q) explorer: LatentQExplorer,
    pub(in crate::latent_q) device: Device,
    pub(in crate::latent_q) phantom: PhantomData<(E, R)>,
}

impl<E, R> LatentQ<E, R>
where
    E: Env,
    R: SequenceReplayBufferBase<Batch = Batch>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
{
    /// Returns the online model.
    pub fn model(&self) -> &LatentModel {
        &self.model
    }

    /// Returns the target model.
    pub fn model_tgt(&self) -> &LatentModel {
        &self.model_tgt
    }

    /// Number of contiguous transitions the agent draws per sequence.
    pub fn replay_seq_len(&self) -> usize {
        self.replay_seq_len
    }

    /// Copies the online variables into the target model.
    pub fn sync_target(&mut self) -> Result<()> {
        let src = self.model.get_var_store();
        self.model_tgt.get_var_store_mut().copy(src)?;
        Ok(())
    }

    /// Clears the latent memory of both encoders. Called at episode
    /// boundaries.
    pub fn reset(&mut self) {
        self.model.encoder.reset();
        self.model_tgt.encoder.reset();
    }

    /// Overwrites the encoder variables of both models from a checkpoint.
    pub fn load_encoder<T: AsRef<Path>>(&mut self, path: T, shuffle: bool) -> Result<()> {
        self.model.load_encoder(&path, shuffle)?;
        self.model_tgt.load_encoder(&path, shuffle)?;
        Ok(())
    }

    /// Selects an action for a single observation of shape `[1, ...]`.
    ///
    /// Returns the action of shape `[1, 1]` along with the latent memory
    /// window the observation was encoded against, if the encoder carries
    /// memory. The window is what gets stored in the replay buffer so that
    /// training can re-encode the sequence from the same starting point.
    /// With `force_greedy`, or outside training mode, the explorer is
    /// bypassed.
    pub fn select_action(&mut self, obs: &Tensor, force_greedy: bool) -> (Tensor, Option<Tensor>) {
        no_grad(|| {
            let window = match self.mem_len > 0 {
                true => Some(self.model.encoder.memory().unwrap_or_else(|| {
                    Tensor::zeros(
                        [1, self.mem_len, self.model.encoder.latent_dim()],
                        (Float, self.device),
                    )
                })),
                false => None,
            };

            let z = self.model.encoder.forward(obs, None);
            let q = self.model.head.greedy_values(&z);

            let act = if force_greedy || !self.train {
                q.argmax(-1, true)
            } else {
                match &mut self.explorer {
                    LatentQExplorer::EpsilonGreedy(egreedy) => egreedy.action(&q),
                    LatentQExplorer::LatentShift(shift) => {
                        let norms = self.model.latent_shift_norms(&z);
                        shift.action(&q, &norms)
                    }
                }
            };

            (act, window)
        })
    }

    /// Re-encodes a sampled sequence through the memory window.
    ///
    /// The window is seeded from the snapshot stored with the transition at
    /// offset `mem_len` and advanced over the remaining offsets, so the
    /// encoder sees the same history it saw during the rollout. Returns the
    /// latents of the last observation and of its successor, or
    /// [`AuxrlError::MissingLatent`] when the sequence was recorded without
    /// snapshots.
    fn burn_in(&self, encoder: &Encoder, seq: &[Batch]) -> Result<(Tensor, Tensor)> {
        let mem_len = self.mem_len as usize;
        let seq_len = seq.len();

        let mut window = seq[mem_len]
            .latent
            .as_ref()
            .and_then(|l| l.tensor())
            .ok_or(AuxrlError::MissingLatent)?
            .to(self.device);
        let mut z = None;

        for t in mem_len..seq_len {
            let obs = seq[t].obs.tensor().unwrap();
            let z_t = encoder.forward(&obs, Some(&window));
            window = Tensor::cat(
                &[window.narrow(1, 1, self.mem_len - 1), z_t.unsqueeze(1)],
                1,
            );
            z = Some(z_t);
        }

        let next_obs = seq[seq_len - 1].next_obs.tensor().unwrap();
        let next_z = encoder.forward(&next_obs, Some(&window));

        Ok((z.unwrap(), next_z))
    }

    fn opt_(&mut self, buffer: &mut R) -> Result<Record> {
        // The target is synchronized before computing this update's
        // bootstrap values.
        if self.n_updates % self.target_update_interval == 0 {
            self.sync_target()?;
        }

        let seq = buffer.sample(self.batch_size, self.replay_seq_len)?;
        let last = &seq[seq.len() - 1];

        let act = last.act.tensor().unwrap().to(self.device);
        let reward = Tensor::from_slice(&last.reward[..])
            .to(self.device)
            .view([-1, 1]);
        let is_terminal = Tensor::from_slice(&last.is_terminal[..])
            .to_kind(Float)
            .to(self.device)
            .view([-1, 1]);
        let not_done = 1 - is_terminal;

        let n_actions = self.model.n_actions();
        let onehot = act.squeeze_dim(-1).one_hot(n_actions).to_kind(Float);

        // Latents of the last transition of the sequence. The bootstrap
        // latent of the memory encoder comes from the online burn-in; the
        // memoryless path uses the target encoder.
        let (z, next_z, target_next_z) = if self.mem_len > 0 {
            let (z, next_z) = self.burn_in(&self.model.encoder, &seq)?;
            let target_next_z = next_z.detach();
            (z, next_z, target_next_z)
        } else {
            let obs = last.obs.tensor().unwrap();
            let next_obs = last.next_obs.tensor().unwrap();
            let z = self.model.encoder.forward(&obs, None);
            let next_z = self.model.encoder.forward(&next_obs, None);
            let target_next_z = no_grad(|| self.model_tgt.encoder.forward(&next_obs, None));
            (z, next_z, target_next_z)
        };

        let tz = SubModel2::forward(&self.model.trans, &z, &onehot);

        let loss_pos = if self.pred_td {
            // One-step bootstrapped prediction target: the first transition
            // of the pair is trained towards its successor latent plus the
            // discounted prediction at the most recent transition.
            let first = &seq[0];
            let first_obs = first.obs.tensor().unwrap();
            let first_next_obs = first.next_obs.tensor().unwrap();
            let first_act = first.act.tensor().unwrap().to(self.device);
            let first_onehot = first_act.squeeze_dim(-1).one_hot(n_actions).to_kind(Float);

            let first_z = self.model.encoder.forward(&first_obs, None);
            let first_next_z = self.model.encoder.forward(&first_next_obs, None);
            let first_tz = SubModel2::forward(&self.model.trans, &first_z, &first_onehot);

            let boot = no_grad(|| SubModel2::forward(&self.model.trans, &z, &onehot));
            let target = first_next_z + self.pred_gamma * boot;
            first_tz.mse_loss(&target, Reduction::Mean)
        } else {
            tz.mse_loss(&next_z, Reduction::Mean)
        };

        let z_shuffled = z.roll([1], [0]);
        let loss_neg_random = (-self.entropy_temp
            * (&z - z_shuffled)
                .square()
                .sum_dim_intlist([1i64].as_slice(), false, Float)
                .sqrt())
        .exp()
        .mean(Float);
        let loss_neg_neighbor = (-self.entropy_temp
            * (&z - &next_z)
                .square()
                .sum_dim_intlist([1i64].as_slice(), false, Float)
                .sqrt())
        .exp()
        .mean(Float);

        let loss_value = self.model.head.td_loss(
            &self.model_tgt.head,
            &z,
            &next_z,
            &target_next_z,
            &act,
            &reward,
            &not_done,
            self.discount_factor,
        )?;

        let w = &self.loss_weights;
        let loss = w.pos_sample * &loss_pos
            + w.neg_neighbor * &loss_neg_neighbor
            + w.neg_random * &loss_neg_random
            + w.value * &loss_value;

        let clip = self.clip_grad_norm;
        self.model.backward_step_clipped(&loss, clip);

        self.n_updates += 1;
        if self.n_updates % self.target_update_interval == 0 {
            info!(
                "update {}: value loss {:.6}",
                self.n_updates,
                f32::try_from(&loss_value)?
            );
        }

        Ok(Record::from_slice(&[
            (
                "loss_pos_sample",
                RecordValue::Scalar(w.pos_sample as f32 * f32::try_from(&loss_pos)?),
            ),
            (
                "loss_neg_neighbor",
                RecordValue::Scalar(w.neg_neighbor as f32 * f32::try_from(&loss_neg_neighbor)?),
            ),
            (
                "loss_neg_random",
                RecordValue::Scalar(w.neg_random as f32 * f32::try_from(&loss_neg_random)?),
            ),
            (
                "loss_value",
                RecordValue::Scalar(w.value as f32 * f32::try_from(&loss_value)?),
            ),
            ("loss_total", RecordValue::Scalar(f32::try_from(&loss)?)),
        ]))
    }

    fn zero_record() -> Record {
        Record::from_slice(&[
            ("loss_pos_sample", RecordValue::Scalar(0.0)),
            ("loss_neg_neighbor", RecordValue::Scalar(0.0)),
            ("loss_neg_random", RecordValue::Scalar(0.0)),
            ("loss_value", RecordValue::Scalar(0.0)),
            ("loss_total", RecordValue::Scalar(0.0)),
        ])
    }
}

impl<E, R> Policy<E> for LatentQ<E, R>
where
    E: Env,
    R: SequenceReplayBufferBase<Batch = Batch>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
{
    fn sample(&mut self, obs: &E::Obs) -> E::Act {
        let obs = obs.clone().into();
        let (act, _) = self.select_action(&obs, false);
        act.into()
    }
}

impl<E, R> Configurable<E> for LatentQ<E, R>
where
    E: Env,
    R: SequenceReplayBufferBase<Batch = Batch>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
{
    type Config = LatentQConfig;

    /// Constructs the agent. Panics when the configuration is inconsistent
    /// or specifies no device.
    fn build(config: Self::Config) -> Self {
        config
            .validate()
            .expect("invalid latent Q agent configuration");
        let device = config
            .device
            .expect("No device is given for latent Q agent")
            .into();
        let mem_len = config.model_config.encoder_config.mem_len;
        let replay_seq_len = (if config.pred_td { 2 } else { 1 })
            + (if mem_len > 0 { config.train_seq_len } else { 0 });
        let model = LatentModel::build(config.model_config, device)
            .expect("Failed to build the latent model");
        let model_tgt = model.clone();

        LatentQ {
            model,
            model_tgt,
            n_updates: 0,
            batch_size: config.batch_size,
            replay_seq_len,
            mem_len,
            pred_td: config.pred_td,
            pred_gamma: config.pred_gamma,
            discount_factor: config.discount_factor,
            loss_weights: config.loss_weights,
            entropy_temp: config.entropy_temp,
            clip_grad_norm: config.clip_grad_norm,
            target_update_interval: config.target_update_interval,
            train: config.train,
            explorer: config.explorer,
            device,
            phantom: PhantomData,
        }
    }
}

impl<E, R> Agent<E, R> for LatentQ<E, R>
where
    E: Env,
    R: SequenceReplayBufferBase<Batch = Batch>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn opt(&mut self, buffer: &mut R) -> Result<Record> {
        if buffer.is_ready(self.batch_size, self.replay_seq_len) {
            self.opt_(buffer)
        } else {
            Ok(Self::zero_record())
        }
    }

    fn save_params<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        fs::create_dir_all(&path)?;
        self.model
            .save(&path.as_ref().join("latent_q.pt").as_path())?;
        self.model_tgt
            .save(&path.as_ref().join("latent_q_tgt.pt").as_path())?;
        Ok(())
    }

    fn load_params<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.model
            .load(&path.as_ref().join("latent_q.pt").as_path())?;
        self.model_tgt
            .load(&path.as_ref().join("latent_q_tgt.pt").as_path())?;
        Ok(())
    }
}
