//! The bounded tool-calling agent loop.

mod errors;
pub mod instructions;
mod runner;
mod state;

pub use errors::AgentError;
pub use runner::{Agent, AgentBuilder, DEFAULT_MAX_ATTEMPTS};
pub use state::{ArtifactRecord, InvokeOutcome, Phase};
