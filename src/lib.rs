//! Bounded tool-calling agent loop over MCP servers and Ollama-served
//! models.
//!
//! The crate is layered the usual way: `domain` holds the conversation
//! types, `application` the agent loop, the tool registry and the stdio
//! front end, `infrastructure` the model provider and the MCP transports,
//! and `config` the TOML application configuration.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;

pub use application::{agent, stdio, toolkit};
pub use infrastructure::{mcp, model};
