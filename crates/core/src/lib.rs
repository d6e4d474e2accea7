//! Copperleaf Core - Shared types library.
//!
//! This crate provides common types used across all Copperleaf components:
//! - `cart` - The cart state engine consumed by the storefront UI
//! - `integration-tests` - End-to-end scenario tests
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no network access, no
//! timers. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, the quantity ledger, and the session token

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
