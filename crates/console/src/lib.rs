//! Punchcard merchant console library.
//!
//! Identity bootstrap and access gating for the merchant console, exposed as
//! a library so the binary, the CLI and the integration tests share it.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;

pub use config::ConsoleConfig;
pub use gate::{AccessGate, GateController};
pub use identity::{IdentityCache, IdentityResolver};
pub use routes::build_app;
pub use state::AppState;
