//! # grove
//!
//! Library side of the Grove binary: CLI definitions, command
//! implementations and TOML configuration, exposed for integration tests.

pub mod cli;
pub mod config;
