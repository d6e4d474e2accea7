//! Copperleaf cart state engine.
//!
//! Reconciles two sources of truth - the anonymous, locally-held guest
//! cart and the server-persisted, identity-bound cart - across login,
//! logout, token expiry, and concurrent browser tabs, without ever losing
//! in-progress selections or double-counting merged quantities.
//!
//! # Architecture
//!
//! - [`storage`] - durable key-value client storage (one browser profile)
//! - [`store`] - the write-through local cart store over that storage
//! - [`session`] - bearer-token ownership and the one-shot expiry timer
//! - [`gateway`] - the REST contract to the server's per-user cart
//! - [`sync`] - the Idle/Syncing/Degraded synchronization state machine
//! - [`facade`] - the surface product pages, the navbar badge, and
//!   checkout gating actually call
//!
//! Local mutations are synchronous and always succeed from the caller's
//! perspective; every network failure is absorbed into
//! [`sync::SyncState::Degraded`] and retried or dropped per policy.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod facade;
pub mod gateway;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::CartConfig;
pub use error::CartError;
pub use facade::CartFacade;
pub use gateway::{CartGateway, HttpCartGateway};
pub use session::SessionMonitor;
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use store::LocalCartStore;
pub use sync::{CartOwnership, CartSynchronizer, DegradedReason, SyncState};
