//! Remote table store: the hosted database-as-a-service behind the shop.
//!
//! # Architecture
//!
//! - The remote store is the source of truth for every table; the storefront
//!   keeps no local copy beyond per-shopper snapshots
//! - [`RemoteStore`] is the contract the cart, wishlist, catalog and checkout
//!   services are written against: filtered selects, insert, update, delete,
//!   upsert, stored-procedure calls and the session-scoped auth lookup
//! - A [`Connector`] hands out one store per shopper session, so sign-in
//!   state never leaks between shoppers while the transport is shared
//!
//! # Adapters
//!
//! - [`rest::RestConnector`] - PostgREST-style HTTP API via `reqwest`
//! - [`memory::MemoryBackend`] - in-process tables for tests and local runs

pub mod memory;
pub mod query;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bazaar_core::{Email, UserId};

pub use query::{Filter, Order, Query};

/// Stored procedure that writes an order header and its lines in one
/// transaction. Takes `p_order` (object) and `p_items` (array); returns the
/// new order id.
pub const PLACE_ORDER: &str = "place_order";

/// One row as exchanged with the remote store.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Tables the storefront reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    CartItems,
    WishlistItems,
    Products,
    Categories,
    Orders,
    OrderItems,
    Addresses,
}

impl Table {
    /// Table name on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CartItems => "cart_items",
            Self::WishlistItems => "wishlist_items",
            Self::Products => "products",
            Self::Categories => "categories",
            Self::Orders => "orders",
            Self::OrderItems => "order_items",
            Self::Addresses => "addresses",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated user behind a store session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: Email,
}

/// Errors that can occur when talking to the remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials rejected or session expired.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limited by the remote store.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),
}

/// A session-bound handle to the remote table store.
///
/// Each handle carries its own auth state: [`RemoteStore::sign_in`] on one
/// shopper's store never changes what another shopper's store sees.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Filtered select; returns matching rows in the requested order.
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError>;

    /// Insert rows, returning them as stored (with generated ids).
    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, RemoteError>;

    /// Apply `patch` to every row matching `filters`.
    async fn update(&self, table: Table, filters: &[Filter], patch: Row)
    -> Result<(), RemoteError>;

    /// Delete every row matching `filters`.
    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<(), RemoteError>;

    /// Insert or, when `conflict` columns collide with an existing row,
    /// overwrite that row's other columns with the supplied values.
    async fn upsert(&self, table: Table, row: Row, conflict: &[&str]) -> Result<(), RemoteError>;

    /// Call a stored procedure.
    async fn rpc(
        &self,
        function: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError>;

    /// The signed-in user for this session, if any.
    async fn current_user(&self) -> Result<Option<Identity>, RemoteError>;

    /// Authenticate this session with email and password.
    async fn sign_in(&self, email: &Email, password: &str) -> Result<Identity, RemoteError>;

    /// Drop this session's credentials.
    async fn sign_out(&self) -> Result<(), RemoteError>;
}

/// Factory for session-bound stores sharing one transport.
pub trait Connector: Send + Sync {
    /// Open a fresh, signed-out store session.
    fn connect(&self) -> Arc<dyn RemoteStore>;
}

/// Build a [`Row`] from a JSON object literal.
///
/// Non-object values produce an empty row.
#[must_use]
pub fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Decode rows into typed records.
///
/// # Errors
///
/// Returns `RemoteError::Parse` on the first row that does not fit `T`.
pub fn from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, RemoteError> {
    rows.into_iter()
        .map(|r| serde_json::from_value(serde_json::Value::Object(r)).map_err(RemoteError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        let names: Vec<&str> = [
            Table::Categories,
            Table::Products,
            Table::CartItems,
            Table::WishlistItems,
            Table::Orders,
            Table::OrderItems,
            Table::Addresses,
        ]
        .iter()
        .map(Table::as_str)
        .collect();
        assert_eq!(
            names,
            [
                "categories",
                "products",
                "cart_items",
                "wishlist_items",
                "orders",
                "order_items",
                "addresses"
            ]
        );
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::Api {
            status: 409,
            message: "duplicate key".to_string(),
        };
        assert_eq!(err.to_string(), "API error (409): duplicate key");
        assert_eq!(
            RemoteError::RateLimited(30).to_string(),
            "Rate limited, retry after 30 seconds"
        );
    }

    #[test]
    fn test_from_rows_reports_bad_row() {
        #[derive(Deserialize)]
        struct Named {
            #[allow(dead_code)]
            name: String,
        }

        let good = row(serde_json::json!({"name": "Tea"}));
        let bad = row(serde_json::json!({"title": "Tea"}));
        assert!(from_rows::<Named>(vec![good.clone()]).is_ok());
        assert!(matches!(
            from_rows::<Named>(vec![good, bad]),
            Err(RemoteError::Parse(_))
        ));
    }

    #[test]
    fn test_row_from_non_object() {
        assert!(row(serde_json::json!([1, 2])).is_empty());
        assert_eq!(row(serde_json::json!({"a": 1})).len(), 1);
    }
}
