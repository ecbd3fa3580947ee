//! Core types for Bazaar.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod catalog;
pub mod email;
pub mod id;
pub mod order;
pub mod price;
pub mod scope;
pub mod status;

pub use catalog::{Category, Product, slugify};
pub use email::{Email, EmailError};
pub use id::*;
pub use order::{OrderTotals, PricingPolicy, ShippingDetails, ShippingError};
pub use price::{CurrencyCode, Price};
pub use scope::Scope;
pub use status::*;
