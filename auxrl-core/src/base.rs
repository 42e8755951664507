//! Core abstractions.
mod agent;
mod env;
mod policy;
mod replay_buffer;
mod step;
pub use agent::Agent;
pub use env::Env;
pub use policy::{Configurable, Policy};
pub use replay_buffer::SequenceReplayBufferBase;
use std::fmt::Debug;
pub use step::{Info, Step};

/// A set of observations of an environment.
pub trait Obs: Clone + Debug {
    /// Returns the number of observations in the object.
    ///
    /// Vectorized environments are not supported, so this is expected to be 1.
    fn len(&self) -> usize;
}

/// A set of actions of an environment.
pub trait Act: Clone + Debug {
    /// Returns the number of actions in the object.
    fn len(&self) -> usize;
}
