//! Cart route handlers.
//!
//! Every write answers with a [`CartMutation`]: what happened, the cart as
//! it now stands, and the notifications the write raised.

use axum::{
    Json,
    extract::State,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use bazaar_core::{CurrencyCode, Price, ProductId};

use super::product_for_write;
use crate::error::Result;
use crate::middleware::Shopper;
use crate::services::cart::ADD_FAILED;
use crate::services::{CartSnapshot, Notification, Outcome, ShopperSession};
use crate::state::AppState;

/// Cart snapshot with its totals.
#[derive(Debug, Serialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: CartSnapshot,
    pub total_price: Decimal,
    pub total_items: u64,
    /// Total formatted in the shop currency, e.g. `₹1230.00`.
    pub total_display: String,
}

impl CartView {
    #[must_use]
    pub fn new(cart: CartSnapshot, currency: CurrencyCode) -> Self {
        let total_price = cart.total_price();
        Self {
            total_items: cart.total_items(),
            total_display: Price::new(total_price, currency).display(),
            total_price,
            cart,
        }
    }

    pub async fn of(shopper: &ShopperSession, state: &AppState) -> Self {
        Self::new(
            shopper.cart().snapshot().await,
            state.config().checkout.currency,
        )
    }
}

/// Response to a cart write.
#[derive(Debug, Serialize)]
pub struct CartMutation {
    pub outcome: Outcome,
    pub cart: CartView,
    pub notifications: Vec<Notification>,
}

impl CartMutation {
    async fn after(outcome: Outcome, shopper: &ShopperSession, state: &AppState) -> Json<Self> {
        Json(Self {
            outcome,
            cart: CartView::of(shopper, state).await,
            notifications: shopper.notifier().drain(),
        })
    }
}

const fn default_quantity() -> u32 {
    1
}

/// Add-to-cart request.
#[derive(Debug, Deserialize)]
pub struct AddToCart {
    pub product_id: ProductId,
    /// The line's new quantity; not added to an existing line's.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

/// Update quantity request.
#[derive(Debug, Deserialize)]
pub struct UpdateQuantity {
    pub product_id: ProductId,
    pub quantity: i32,
}

/// Remove-from-cart request.
#[derive(Debug, Deserialize)]
pub struct RemoveFromCart {
    pub product_id: ProductId,
}

/// Cart panel visibility request. Without `open`, or without a body at all,
/// the panel toggles.
#[derive(Debug, Default, Deserialize)]
pub struct Visibility {
    #[serde(default)]
    pub open: Option<bool>,
}

/// Show the cart, re-read from the store so other sessions' writes show up.
#[instrument(skip(state, shopper))]
pub async fn show(State(state): State<AppState>, Shopper(shopper): Shopper) -> Json<CartView> {
    shopper.cart().load().await;
    Json(CartView::of(&shopper, &state).await)
}

/// Get cart item count (for the header badge).
#[instrument(skip(shopper))]
pub async fn count(Shopper(shopper): Shopper) -> Json<Value> {
    shopper.cart().load().await;
    Json(json!({ "count": shopper.cart().total_items().await }))
}

#[instrument(skip(state, shopper))]
pub async fn add(
    State(state): State<AppState>,
    Shopper(shopper): Shopper,
    Json(body): Json<AddToCart>,
) -> Result<Json<CartMutation>> {
    let outcome =
        match product_for_write(&state, &shopper, body.product_id, ADD_FAILED).await? {
            Some(product) => shopper.cart().add(&product, body.quantity).await,
            None => Outcome::Failed,
        };
    Ok(CartMutation::after(outcome, &shopper, &state).await)
}

#[instrument(skip(state, shopper))]
pub async fn update(
    State(state): State<AppState>,
    Shopper(shopper): Shopper,
    Json(body): Json<UpdateQuantity>,
) -> Json<CartMutation> {
    let outcome = shopper
        .cart()
        .set_quantity(body.product_id, body.quantity)
        .await;
    CartMutation::after(outcome, &shopper, &state).await
}

#[instrument(skip(state, shopper))]
pub async fn remove(
    State(state): State<AppState>,
    Shopper(shopper): Shopper,
    Json(body): Json<RemoveFromCart>,
) -> Json<CartMutation> {
    let outcome = shopper.cart().remove(body.product_id).await;
    CartMutation::after(outcome, &shopper, &state).await
}

#[instrument(skip(state, shopper))]
pub async fn clear(State(state): State<AppState>, Shopper(shopper): Shopper) -> Json<CartMutation> {
    let outcome = shopper.cart().clear().await;
    CartMutation::after(outcome, &shopper, &state).await
}

#[instrument(skip(shopper))]
pub async fn visibility(
    Shopper(shopper): Shopper,
    body: Option<Json<Visibility>>,
) -> Json<Value> {
    let open = body.and_then(|Json(body)| body.open);
    let is_open = match open {
        Some(open) => {
            shopper.cart().set_open(open).await;
            open
        }
        None => shopper.cart().toggle_open().await,
    };
    Json(json!({ "is_open": is_open }))
}
