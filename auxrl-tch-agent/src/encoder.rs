//! Observation encoder producing latent representations.
mod base;
mod config;
pub use base::Encoder;
pub use config::EncoderConfig;
