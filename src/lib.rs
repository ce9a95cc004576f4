//! persona library
//!
//! Configurable conversational agents: partial persona configurations are
//! normalized into agent definitions, registered by identity, and invoked
//! against a streaming model provider with per-thread memory. Exposed over
//! an HTTP API and an interactive terminal chat.

pub mod agent;
pub mod cli;
pub mod config;
pub mod logging;
pub mod server;
