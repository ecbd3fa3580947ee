//! Checkout route handlers.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use bazaar_core::{PaymentMethod, ShippingDetails};

use super::cart::CartView;
use crate::error::{Result, add_breadcrumb};
use crate::middleware::{RequireIdentity, Shopper};
use crate::services::{Notification, OrderSummary, PlacedOrder};
use crate::state::AppState;

/// Checkout form submission.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub shipping: ShippingDetails,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

/// Response to a placed order.
#[derive(Debug, Serialize)]
pub struct OrderPlaced {
    pub order: PlacedOrder,
    /// The (now empty) cart.
    pub cart: CartView,
    pub notifications: Vec<Notification>,
}

/// Order summary for the cart as currently stored. Guests get 401.
#[instrument(skip(state, shopper, _user))]
pub async fn summary(
    State(state): State<AppState>,
    RequireIdentity(_user): RequireIdentity,
    Shopper(shopper): Shopper,
) -> Json<OrderSummary> {
    shopper.cart().load().await;
    let cart = shopper.cart().snapshot().await;
    Json(state.checkout().summary(&cart))
}

/// Place the order.
///
/// Rejections leave their notification queued for
/// `GET /api/notifications`.
#[instrument(skip(state, shopper, body))]
pub async fn place(
    State(state): State<AppState>,
    Shopper(shopper): Shopper,
    Json(body): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderPlaced>)> {
    let order = state
        .checkout()
        .place_order(&shopper, &body.shipping, body.payment_method)
        .await?;

    add_breadcrumb(
        "checkout",
        "Order placed",
        Some(&[("order", order.reference.as_str())]),
    );

    let placed = OrderPlaced {
        order,
        cart: CartView::of(&shopper, &state).await,
        notifications: shopper.notifier().drain(),
    };
    Ok((StatusCode::CREATED, Json(placed)))
}
