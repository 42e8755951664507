//! Utilities.
use auxrl_core::record::{Record, RecordValue};
use std::convert::TryFrom;
use tch::{nn::VarStore, Tensor};

/// Interface for handling output dimensions.
pub trait OutDim {
    /// Returns the output dimension.
    fn get_out_dim(&self) -> i64;

    /// Sets the  output dimension.
    fn set_out_dim(&mut self, v: i64);
}

/// Returns the mean and standard deviation of the parameters.
pub fn param_stats(var_store: &VarStore) -> Record {
    let mut record = Record::empty();

    for (k, v) in var_store.variables() {
        let m = f32::try_from(v.mean(tch::Kind::Float)).expect("Failed to convert Tensor to f32");
        let k_mean = format!("{}_mean", &k);
        record.insert(k_mean, RecordValue::Scalar(m));

        let m = f32::try_from(v.std(false)).expect("Failed to convert Tensor to f32");
        let k_std = format!("{}_std", k);
        record.insert(k_std, RecordValue::Scalar(m));
    }

    record
}

/// Rescales gradients so that their global L2 norm does not exceed `max_norm`.
///
/// Only tensors that actually carry a gradient are considered.
pub fn clip_grad_norm(params: &[Tensor], max_norm: f64) {
    let norms = params
        .iter()
        .filter(|p| p.grad().defined())
        .map(|p| p.grad().norm())
        .collect::<Vec<_>>();
    if norms.is_empty() {
        return;
    }

    let total_norm = Tensor::stack(&norms, 0).norm().double_value(&[]);
    if total_norm > max_norm {
        let scale = max_norm / (total_norm + 1e-6);
        tch::no_grad(|| {
            for p in params.iter() {
                let mut g = p.grad();
                if g.defined() {
                    g *= scale;
                }
            }
        });
    }
}
