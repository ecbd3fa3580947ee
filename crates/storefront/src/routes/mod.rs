//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                    - Liveness
//! GET  /health/ready              - Remote store reachability
//!
//! # Catalog
//! GET  /api/products              - Listing (?category=&q=)
//! GET  /api/products/featured     - Featured shelf
//! GET  /api/products/{id}         - Product detail
//! GET  /api/categories            - Categories
//!
//! # Cart
//! GET  /api/cart                  - Snapshot with totals
//! GET  /api/cart/count            - Item count badge
//! POST /api/cart/add              - Set a line's quantity (adds if absent)
//! POST /api/cart/update           - Change quantity, <= 0 removes
//! POST /api/cart/remove           - Remove a line
//! POST /api/cart/clear            - Remove every line
//! POST /api/cart/visibility       - Open, close or toggle the cart panel
//!
//! # Wishlist
//! GET  /api/wishlist              - Snapshot
//! GET  /api/wishlist/{product_id} - Membership
//! POST /api/wishlist/add          - Add a product
//! POST /api/wishlist/remove       - Remove a product
//!
//! # Checkout (requires auth)
//! GET  /api/checkout              - Order summary
//! POST /api/checkout              - Place order
//!
//! # Notifications
//! GET  /api/notifications         - Drain pending notifications
//!
//! # Auth
//! POST /auth/login                - Email and password sign-in
//! POST /auth/logout               - Sign out
//! GET  /auth/me                   - Current identity or null
//! ```
//!
//! Cart and wishlist writes answer with the fresh snapshot, the write's
//! outcome and the drained notifications. A failed remote write is reported
//! in that body, not as a 5xx.

pub mod auth;
pub mod cart;
pub mod checkout;
pub mod health;
pub mod notifications;
pub mod products;
pub mod wishlist;

use axum::{
    Router,
    routing::{get, post},
};
use tracing::error;

use bazaar_core::{Product, ProductId};

use crate::error::AppError;
use crate::services::{Notification, ShopperSession};
use crate::state::AppState;

/// Create the product routes router.
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(products::index))
        .route("/featured", get(products::featured))
        .route("/{id}", get(products::show))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/count", get(cart::count))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
        .route("/clear", post(cart::clear))
        .route("/visibility", post(cart::visibility))
}

/// Create the wishlist routes router.
pub fn wishlist_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(wishlist::show))
        .route("/add", post(wishlist::add))
        .route("/remove", post(wishlist::remove))
        .route("/{product_id}", get(wishlist::contains))
}

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/api/products", product_routes())
        .route("/api/categories", get(products::categories))
        .nest("/api/cart", cart_routes())
        .nest("/api/wishlist", wishlist_routes())
        .route(
            "/api/checkout",
            get(checkout::summary).post(checkout::place),
        )
        .route("/api/notifications", get(notifications::drain))
        .nest("/auth", auth_routes())
}

/// Look up the product a cart or wishlist write refers to.
///
/// An unknown id is the client's mistake. A failed lookup is reported to
/// the shopper like a failed write and yields `None`.
pub(crate) async fn product_for_write(
    state: &AppState,
    shopper: &ShopperSession,
    id: ProductId,
    failure: &str,
) -> Result<Option<Product>, AppError> {
    match state.catalog().get_product(id).await {
        Ok(Some(product)) => Ok(Some(product)),
        Ok(None) => Err(AppError::NotFound(format!("product {id}"))),
        Err(e) => {
            error!(error = %e, product = %id, "Product lookup failed");
            shopper.notifier().push(Notification::error("Error", failure));
            Ok(None)
        }
    }
}
