//! Business logic services for storefront.
//!
//! # Services
//!
//! - `cart` - Cart snapshot synchronized with the remote `cart_items` table
//! - `wishlist` - Wishlist snapshot synchronized with `wishlist_items`
//! - `catalog` - Cached read-only product and category queries
//! - `checkout` - Order summary and atomic order placement
//! - `shopper` - Per-session handle tying the above together
//! - `gate` - Per-scope ordering of write/reload pairs
//! - `notify` - User-facing notification queue
//!
//! Cart and wishlist operations never return errors: failures are logged,
//! reported through [`notify::Notifier`], and leave the snapshot as it was.

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod gate;
pub mod notify;
pub mod shopper;
pub mod wishlist;

use serde::Serialize;
use serde_json::json;

use bazaar_core::{ProductId, Scope, SessionId};

use crate::remote::{RemoteError, RemoteStore, Row};

pub use cart::{CartLine, CartManager, CartSnapshot};
pub use catalog::{Catalog, ProductFilter};
pub use checkout::{CheckoutError, CheckoutService, OrderSummary, PlacedOrder};
pub use gate::ScopeGate;
pub use notify::{Notification, Notifier, Variant};
pub use shopper::{ShopperRegistry, ShopperSession};
pub use wishlist::{WishlistEntry, WishlistManager, WishlistSnapshot};

/// What a cart or wishlist operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The remote write succeeded.
    Applied,
    /// Nothing to do; no remote call was made.
    Skipped,
    /// The remote call failed; the snapshot is unchanged.
    Failed,
}

/// Synchronization phase of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Never loaded.
    #[default]
    Uninitialized,
    /// A load or mutation is in flight.
    Loading,
    /// Snapshot reflects the last completed operation.
    Ready,
}

/// The signed-in user's scope if there is one, else the guest session's.
pub(crate) async fn resolve_scope(
    store: &dyn RemoteStore,
    session_id: SessionId,
) -> Result<Scope, RemoteError> {
    Ok(store
        .current_user()
        .await?
        .map_or(Scope::Guest(session_id), |identity| Scope::User(identity.id)))
}

/// A `(scope, product)` row: exactly one of `user_id` / `session_id` is set.
pub(crate) fn scoped_row(scope: Scope, product_id: ProductId) -> Row {
    let mut row = Row::new();
    row.insert(scope.column().to_owned(), json!(scope.key()));
    row.insert("product_id".to_owned(), json!(product_id));
    row
}
