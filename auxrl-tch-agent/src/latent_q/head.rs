//! Action-value heads on top of latent representations.
use crate::{
    mlp::{Mlp, MlpConfig},
    model::SubModel,
    util::OutDim,
};
use anyhow::Result;
use auxrl_core::error::AuxrlError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tch::{
    nn,
    nn::{Module, VarStore},
    Device,
    Kind::Float,
    Reduction, Tensor,
};

/// Configuration of the quantile variant of [`ValueHead`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct QuantileHeadConfig {
    /// Dimension of the latent representation.
    pub latent_dim: i64,
    /// Dimension of the cosine embedding of percent points.
    pub embed_dim: i64,
    /// Number of quantiles sampled per forward pass.
    pub n_quantiles: i64,
    /// Sizes of hidden layers of the merge network.
    pub units: Vec<i64>,
    /// Number of actions.
    pub out_dim: i64,
}

impl QuantileHeadConfig {
    /// Creates a quantile head configuration.
    pub fn new(latent_dim: i64, embed_dim: i64, n_quantiles: i64, units: Vec<i64>, out_dim: i64) -> Self {
        Self {
            latent_dim,
            embed_dim,
            n_quantiles,
            units,
            out_dim,
        }
    }
}

impl OutDim for QuantileHeadConfig {
    fn get_out_dim(&self) -> i64 {
        self.out_dim
    }

    fn set_out_dim(&mut self, out_dim: i64) {
        self.out_dim = out_dim;
    }
}

/// Configuration of [`ValueHead`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum ValueHeadConfig {
    /// A head emitting one action value per action.
    Scalar(MlpConfig),

    /// A head emitting action-value quantiles.
    Quantile(QuantileHeadConfig),
}

impl ValueHeadConfig {
    /// Creates a scalar head configuration.
    pub fn scalar(latent_dim: i64, units: Vec<i64>, n_actions: i64) -> Self {
        Self::Scalar(MlpConfig::new("q", latent_dim, units, n_actions))
    }

    /// Creates a quantile head configuration.
    pub fn quantile(config: QuantileHeadConfig) -> Self {
        Self::Quantile(config)
    }

    /// Returns the number of actions of the head.
    pub fn n_actions(&self) -> i64 {
        match self {
            Self::Scalar(c) => c.get_out_dim(),
            Self::Quantile(c) => c.out_dim,
        }
    }
}

/// Estimates action-value quantiles from latent representations.
///
/// Percent points are cosine-embedded and merged with the latent vector by
/// elementwise multiplication before the output network.
pub struct QuantileHead {
    config: QuantileHeadConfig,
    device: Device,
    phi: nn::Sequential,
    f: Mlp,
}

impl QuantileHead {
    // Cosine embedding of percent points.
    fn cos_embed_nn(var_store: &VarStore, latent_dim: i64, embed_dim: i64) -> nn::Sequential {
        let p = &var_store.root();
        let device = p.device();
        nn::seq()
            .add_fn(move |tau| {
                let batch_size = tau.size().as_slice()[0];
                let n_percent_points = tau.size().as_slice()[1];
                let tau = tau.unsqueeze(-1);
                let i = Tensor::range(1, embed_dim, (Float, device))
                    .unsqueeze(0)
                    .unsqueeze(0);
                debug_assert_eq!(tau.size().as_slice(), &[batch_size, n_percent_points, 1]);
                debug_assert_eq!(i.size().as_slice(), &[1, 1, embed_dim]);

                let cos = Tensor::cos(&(tau * (PI * i)));
                cos.reshape([-1, embed_dim])
            })
            .add(nn::linear(
                p / "q_phi",
                embed_dim,
                latent_dim,
                Default::default(),
            ))
            .add_fn(|x| x.relu())
    }

    /// Constructs a quantile head on the given variable store.
    pub fn build(var_store: &VarStore, config: QuantileHeadConfig) -> Self {
        let device = var_store.device();
        let phi = Self::cos_embed_nn(var_store, config.latent_dim, config.embed_dim);
        let f = <Mlp as SubModel>::build(
            var_store,
            MlpConfig::new("q_f", config.latent_dim, config.units.clone(), config.out_dim),
        );

        Self {
            config,
            device,
            phi,
            f,
        }
    }

    /// Returns the number of quantiles sampled per forward pass.
    pub fn n_quantiles(&self) -> i64 {
        self.config.n_quantiles
    }

    /// Percent points at quantile midpoints, `(2i + 1) / 2n`.
    fn midpoint_taus(&self, batch_size: i64) -> Tensor {
        let n = self.config.n_quantiles;
        let tau = (Tensor::arange(n, (Float, self.device)) * 2.0 + 1.0) / (2.0 * n as f64);
        tau.unsqueeze(0).repeat([batch_size, 1])
    }

    /// Returns action-value quantiles at the given percent points.
    ///
    /// * The shape of `z` is `[batch_size, latent_dim]`.
    /// * The shape of `tau` is `[batch_size, n_percent_points]`.
    /// * The shape of the output is `[batch_size, n_percent_points, out_dim]`.
    pub fn forward_with_tau(&self, z: &Tensor, tau: &Tensor) -> Tensor {
        let z = z.to(self.device);
        let batch_size = z.size().as_slice()[0];
        let n_percent_points = tau.size().as_slice()[1];

        let phi = self.phi.forward(tau);
        let phi = phi.reshape([batch_size, n_percent_points, self.config.latent_dim]);

        let psi = z.unsqueeze(1);
        let m = psi * phi;

        let a = SubModel::forward(&self.f, &m);
        debug_assert_eq!(
            a.size().as_slice(),
            &[batch_size, n_percent_points, self.config.out_dim]
        );

        a
    }

    /// Returns action-value quantiles at freshly sampled percent points,
    /// along with the percent points themselves.
    pub fn forward(&self, z: &Tensor) -> (Tensor, Tensor) {
        let batch_size = z.size().as_slice()[0];
        let tau = Tensor::rand(
            [batch_size, self.config.n_quantiles],
            (Float, self.device),
        );
        let quantiles = self.forward_with_tau(z, &tau);
        (quantiles, tau)
    }

    fn clone_with_var_store(&self, var_store: &VarStore) -> Self {
        Self::build(var_store, self.config.clone())
    }
}

/// Action-value estimator on top of latent representations.
pub enum ValueHead {
    /// Emits one action value per action.
    Scalar(Mlp),

    /// Emits action-value quantiles.
    Quantile(QuantileHead),
}

impl ValueHead {
    /// Constructs a value head on the given variable store.
    pub fn build(var_store: &VarStore, config: ValueHeadConfig) -> Self {
        match config {
            ValueHeadConfig::Scalar(c) => Self::Scalar(<Mlp as SubModel>::build(var_store, c)),
            ValueHeadConfig::Quantile(c) => Self::Quantile(QuantileHead::build(var_store, c)),
        }
    }

    /// Creates a copy of the head whose variables live on another store.
    pub fn clone_with_var_store(&self, var_store: &VarStore) -> Self {
        match self {
            Self::Scalar(mlp) => Self::Scalar(SubModel::clone_with_var_store(mlp, var_store)),
            Self::Quantile(head) => Self::Quantile(head.clone_with_var_store(var_store)),
        }
    }

    /// Returns action values used for greedy action selection.
    ///
    /// The quantile variant evaluates deterministic midpoint percent points
    /// and averages over them, so repeated calls on the same latent agree.
    pub fn greedy_values(&self, z: &Tensor) -> Tensor {
        match self {
            Self::Scalar(q) => SubModel::forward(q, z),
            Self::Quantile(head) => {
                let tau = head.midpoint_taus(z.size().as_slice()[0]);
                head.forward_with_tau(z, &tau).mean_dim([1i64].as_slice(), false, Float)
            }
        }
    }

    /// Temporal-difference loss with double Q-learning targets.
    ///
    /// Greedy actions for the bootstrap are selected with this (online) head
    /// on `next_z` and evaluated with `tgt` on `target_next_z`. The scalar
    /// variant returns a mean squared error; the quantile variant returns a
    /// quantile huber loss over all pairs of predicted and target quantiles.
    pub fn td_loss(
        &self,
        tgt: &ValueHead,
        z: &Tensor,
        next_z: &Tensor,
        target_next_z: &Tensor,
        act: &Tensor,
        reward: &Tensor,
        not_done: &Tensor,
        discount: f64,
    ) -> Result<Tensor> {
        match (self, tgt) {
            (Self::Scalar(q), Self::Scalar(q_tgt)) => {
                let q_tgt_next = tch::no_grad(|| {
                    let a_star = SubModel::forward(q, next_z).argmax(-1, true);
                    SubModel::forward(q_tgt, target_next_z).gather(-1, &a_star, false)
                });
                let tgt_value = reward + discount * q_tgt_next * not_done;
                let pred = SubModel::forward(q, z).gather(-1, act, false);
                Ok(pred.mse_loss(&tgt_value, Reduction::Mean))
            }
            (Self::Quantile(head), Self::Quantile(head_tgt)) => {
                let batch_size = z.size().as_slice()[0];
                let n = head.config.n_quantiles;
                let n_tgt = head_tgt.config.n_quantiles;

                let (pred_q, tau) = head.forward(z);
                let act = act.unsqueeze(1).repeat([1, n, 1]);
                let pred = pred_q.gather(-1, &act, false).squeeze_dim(-1);

                let tgt_quantiles = tch::no_grad(|| {
                    let tau_sel = head.midpoint_taus(batch_size);
                    let a_star = head
                        .forward_with_tau(next_z, &tau_sel)
                        .mean_dim([1i64].as_slice(), false, Float)
                        .argmax(-1, true);
                    let (tgt_q, _) = head_tgt.forward(target_next_z);
                    let a_star = a_star.unsqueeze(1).repeat([1, n_tgt, 1]);
                    tgt_q.gather(-1, &a_star, false).squeeze_dim(-1)
                });
                let tgt_value = reward + discount * tgt_quantiles * not_done;

                // Pairwise differences between target samples and predicted
                // quantiles, [batch_size, n, n].
                let td = tgt_value.unsqueeze(1) - pred.unsqueeze(2);
                let expected = vec![batch_size, n, n];
                if td.size() != expected {
                    return Err(AuxrlError::ShapeMismatch {
                        expected,
                        got: td.size(),
                    }
                    .into());
                }

                let tau = tau.unsqueeze(-1).repeat([1, 1, n]);
                let loss = quantile_huber_loss(&td, &tau, HUBER_KAPPA)
                    .sum_dim_intlist([1i64].as_slice(), false, Float)
                    .mean_dim([1i64].as_slice(), false, Float)
                    .mean(Float);
                Ok(loss)
            }
            _ => Err(AuxrlError::InvalidConfig(
                "online and target value heads have different variants".into(),
            )
            .into()),
        }
    }
}

/// Huber smoothing width of the quantile regression loss.
const HUBER_KAPPA: f64 = 1.0;

/// Quantile regression loss of the pairwise errors `td` against quantile
/// fractions `tau`, both of shape `[batch_size, n, n]`. Underestimates are
/// weighted by `1 - tau` and overestimates by `tau`, with the error
/// Huber-smoothed within `kappa` of zero.
fn quantile_huber_loss(td: &Tensor, tau: &Tensor, kappa: f64) -> Tensor {
    debug_assert_eq!(td.size(), tau.size());

    let below = &td.lt(0.0).detach();
    let huber = td.smooth_l1_loss(&Tensor::zeros_like(td), Reduction::None, kappa);
    (tau - Tensor::where_scalar(below, 1., 0.)).abs() * huber
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    fn td_loss_inputs() -> (Tensor, Tensor, Tensor, Tensor, Tensor) {
        let z = Tensor::rand([3, 16], tch::kind::FLOAT_CPU);
        let next_z = Tensor::rand([3, 16], tch::kind::FLOAT_CPU);
        let act = Tensor::from_slice(&[0i64, 1, 2]).unsqueeze(-1);
        let reward = Tensor::from_slice(&[1.0f32, 0.0, -1.0]).view([-1, 1]);
        let not_done = Tensor::from_slice(&[1.0f32, 1.0, 0.0]).view([-1, 1]);
        (z, next_z, act, reward, not_done)
    }

    #[test]
    fn quantile_head_output_shapes() {
        let vs = VarStore::new(Device::Cpu);
        let head = QuantileHead::build(&vs, QuantileHeadConfig::new(16, 64, 8, vec![32], 4));
        let z = Tensor::rand([5, 16], tch::kind::FLOAT_CPU);

        let (q, tau) = head.forward(&z);
        assert_eq!(q.size(), vec![5, 8, 4]);
        assert_eq!(tau.size(), vec![5, 8]);
    }

    #[test]
    fn greedy_values_deterministic_for_quantile_head() {
        let vs = VarStore::new(Device::Cpu);
        let head = ValueHead::build(
            &vs,
            ValueHeadConfig::quantile(QuantileHeadConfig::new(16, 64, 8, vec![32], 4)),
        );
        let z = Tensor::rand([3, 16], tch::kind::FLOAT_CPU);

        let v1 = head.greedy_values(&z);
        let v2 = head.greedy_values(&z);
        assert_eq!(v1, v2);
        assert_eq!(v1.size(), vec![3, 4]);
    }

    #[test]
    fn td_loss_pairs_all_quantiles() {
        let vs = VarStore::new(Device::Cpu);
        let vs_tgt = VarStore::new(Device::Cpu);
        let config = ValueHeadConfig::quantile(QuantileHeadConfig::new(16, 64, 8, vec![32], 4));
        let head = ValueHead::build(&vs, config.clone());
        let head_tgt = ValueHead::build(&vs_tgt, config);
        let (z, next_z, act, reward, not_done) = td_loss_inputs();

        // The loss errors out unless the pairwise error tensor is
        // [batch_size, 8, 8], so success implies the shape.
        let loss = head
            .td_loss(&head_tgt, &z, &next_z, &next_z, &act, &reward, &not_done, 0.99)
            .unwrap();
        assert_eq!(loss.size(), Vec::<i64>::new());
        assert!(f32::try_from(&loss).unwrap().is_finite());
    }

    #[test]
    fn td_loss_rejects_mismatched_quantile_counts() {
        let vs = VarStore::new(Device::Cpu);
        let vs_tgt = VarStore::new(Device::Cpu);
        let head = ValueHead::build(
            &vs,
            ValueHeadConfig::quantile(QuantileHeadConfig::new(16, 64, 8, vec![32], 4)),
        );
        let head_tgt = ValueHead::build(
            &vs_tgt,
            ValueHeadConfig::quantile(QuantileHeadConfig::new(16, 64, 6, vec![32], 4)),
        );
        let (z, next_z, act, reward, not_done) = td_loss_inputs();

        let err = head
            .td_loss(&head_tgt, &z, &next_z, &next_z, &act, &reward, &not_done, 0.99)
            .unwrap_err();
        match err.downcast_ref::<AuxrlError>() {
            Some(AuxrlError::ShapeMismatch { expected, got }) => {
                assert_eq!(expected.as_slice(), [3, 8, 8]);
                assert_eq!(got.as_slice(), [3, 8, 6]);
            }
            _ => panic!("unexpected error: {}", err),
        }
    }
}
