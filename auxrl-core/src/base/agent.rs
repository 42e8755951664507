//! Agent.
use super::{Env, Policy};
use crate::record::Record;
use anyhow::Result;
use std::path::Path;

/// Represents a trainable policy on an environment.
pub trait Agent<E: Env, R>: Policy<E> {
    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Performs a single optimization step.
    ///
    /// `buffer` is a replay buffer from which transition sequences are drawn.
    /// When the buffer does not have enough data yet, this is a no-op and the
    /// returned [`Record`] contains zero losses, so callers can poll readiness
    /// without special-casing.
    fn opt(&mut self, buffer: &mut R) -> Result<Record>;

    /// Save the parameters of the agent in the given directory.
    ///
    /// This method commonly creates a number of files in the directory, e.g.
    /// the online and target networks of a value-based agent.
    fn save_params<T: AsRef<Path>>(&self, path: T) -> Result<()>;

    /// Load the parameters of the agent from the given directory.
    fn load_params<T: AsRef<Path>>(&mut self, path: T) -> Result<()>;
}
