//! Punchcard Core - Shared types library.
//!
//! This crate provides the types shared by every Punchcard component:
//! - `console` - Merchant console with the identity bootstrap and access gate
//! - `cli` - Developer tooling for inspecting identity resolution
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no clocks. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, the identity record with its shape validation,
//!   and the gate decision enum

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
