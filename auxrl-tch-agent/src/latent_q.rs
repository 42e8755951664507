//! Q-learning agent acting on latent representations.
mod base;
mod config;
mod explorer;
mod head;
mod model;
pub use base::LatentQ;
pub use config::{LatentModelConfig, LatentQConfig, LossWeights};
pub use explorer::{EpsilonGreedy, LatentQExplorer, LatentShift};
pub use head::{QuantileHeadConfig, ValueHead, ValueHeadConfig};
pub use model::LatentModel;
