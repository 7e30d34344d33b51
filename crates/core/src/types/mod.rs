//! Core types for Punchcard.
//!
//! This module provides type-safe wrappers for the identity and access domain.

pub mod gate;
pub mod id;
pub mod identity;

pub use gate::GateDecision;
pub use id::*;
pub use identity::{IdentityRecord, ShapeError};
