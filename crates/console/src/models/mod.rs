//! Domain models for the console.

pub mod session;

pub use session::{SignedInPrincipal, keys as session_keys};
