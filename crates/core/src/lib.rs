//! Bazaar Core - Shared domain types.
//!
//! This crate provides the types used across all Bazaar components:
//! - `storefront` - Public-facing shop service (catalog, cart, wishlist, checkout)
//! - `cli` - Command-line tools for migrations and catalog seeding
//!
//! # Architecture
//!
//! The core crate contains only types and pure arithmetic - no I/O, no remote
//! store access, no HTTP clients. This keeps it lightweight and allows it to
//! be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, prices, emails, catalog records, cart scopes,
//!   and checkout pricing/validation

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
