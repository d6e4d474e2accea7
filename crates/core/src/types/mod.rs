//! Core types for Copperleaf.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod ledger;
pub mod token;

pub use id::*;
pub use ledger::QuantityLedger;
pub use token::{SessionToken, TokenClaims, TokenError};
