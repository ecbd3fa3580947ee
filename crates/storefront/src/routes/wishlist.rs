//! Wishlist route handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use bazaar_core::ProductId;

use super::product_for_write;
use crate::error::Result;
use crate::middleware::Shopper;
use crate::services::wishlist::ADD_FAILED;
use crate::services::{Notification, Outcome, ShopperSession, WishlistSnapshot};
use crate::state::AppState;

/// Response to a wishlist write.
#[derive(Debug, Serialize)]
pub struct WishlistMutation {
    pub outcome: Outcome,
    pub wishlist: WishlistSnapshot,
    pub notifications: Vec<Notification>,
}

impl WishlistMutation {
    async fn after(outcome: Outcome, shopper: &ShopperSession) -> Json<Self> {
        Json(Self {
            outcome,
            wishlist: shopper.wishlist().snapshot().await,
            notifications: shopper.notifier().drain(),
        })
    }
}

/// Wishlist write request.
#[derive(Debug, Deserialize)]
pub struct WishlistItem {
    pub product_id: ProductId,
}

#[instrument(skip(shopper))]
pub async fn show(Shopper(shopper): Shopper) -> Json<WishlistSnapshot> {
    shopper.wishlist().load().await;
    Json(shopper.wishlist().snapshot().await)
}

/// Whether a product is on the wishlist (for the heart toggle).
#[instrument(skip(shopper))]
pub async fn contains(Shopper(shopper): Shopper, Path(product_id): Path<ProductId>) -> Json<Value> {
    Json(json!({ "present": shopper.wishlist().contains(product_id).await }))
}

#[instrument(skip(state, shopper))]
pub async fn add(
    State(state): State<AppState>,
    Shopper(shopper): Shopper,
    Json(body): Json<WishlistItem>,
) -> Result<Json<WishlistMutation>> {
    let outcome =
        match product_for_write(&state, &shopper, body.product_id, ADD_FAILED).await? {
            Some(product) => shopper.wishlist().add(&product).await,
            None => Outcome::Failed,
        };
    Ok(WishlistMutation::after(outcome, &shopper).await)
}

#[instrument(skip(shopper))]
pub async fn remove(
    Shopper(shopper): Shopper,
    Json(body): Json<WishlistItem>,
) -> Json<WishlistMutation> {
    let outcome = shopper.wishlist().remove(body.product_id).await;
    WishlistMutation::after(outcome, &shopper).await
}
