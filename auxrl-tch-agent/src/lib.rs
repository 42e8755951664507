//! Latent-representation RL agents implemented with [tch](https://crates.io/crates/tch).
#![warn(missing_docs)]
mod device;
pub mod encoder;
pub mod latent_q;
pub mod mlp;
pub mod model;
pub mod opt;
pub mod tensor_batch;
pub mod util;

pub use device::Device;
