//! CLI command implementations.

pub mod whoami;
