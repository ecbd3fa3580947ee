//! Order summary and placement.
//!
//! Validation and pricing happen locally; the order header and its lines
//! are then written by a single `place_order` procedure call, so the store
//! never holds a header without its lines.
//!
//! Placement holds the user's cart turn from the reload that prices the
//! order until the cart is cleared, so two sessions of one account cannot
//! both order the same rows.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use bazaar_core::{
    AddressRole, CurrencyCode, EmailError, OrderId, OrderStatus, OrderTotals, PaymentMethod,
    PaymentStatus, Price, ProductId, Scope, ShippingDetails, ShippingError,
};

use super::cart::CartSnapshot;
use super::notify::Notification;
use super::shopper::ShopperSession;
use crate::config::CheckoutConfig;
use crate::remote::{PLACE_ORDER, RemoteError, Table, row};

const ORDER_FAILED: &str = "Failed to place order. Please try again.";

/// Why an order was not placed.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("sign in to place an order")]
    NotAuthenticated,

    #[error("cart is empty")]
    EmptyCart,

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),
}

impl From<ShippingError> for CheckoutError {
    fn from(err: ShippingError) -> Self {
        match err {
            ShippingError::MissingFields(fields) => Self::MissingFields(fields),
            ShippingError::InvalidEmail(e) => Self::InvalidEmail(e),
        }
    }
}

/// One priced line of the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryLine {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// What the shopper would pay for the current cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub lines: Vec<SummaryLine>,
    pub item_count: u64,
    pub totals: OrderTotals,
    pub currency: CurrencyCode,
    /// `totals.total` formatted with the currency symbol.
    pub total_display: String,
}

/// A successfully placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    /// Short reference shown to the shopper.
    pub reference: String,
    pub totals: OrderTotals,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
}

/// Checkout with the configured pricing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckoutService {
    config: CheckoutConfig,
}

impl CheckoutService {
    #[must_use]
    pub const fn new(config: CheckoutConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Price the cart. Pure.
    #[must_use]
    pub fn summary(&self, cart: &CartSnapshot) -> OrderSummary {
        let lines = cart
            .lines
            .iter()
            .map(|line| SummaryLine {
                product_id: line.product_id(),
                name: line.product.name.clone(),
                quantity: line.quantity,
                unit_price: line.product.price,
                line_total: line.line_total(),
            })
            .collect();
        let totals = OrderTotals::compute(cart.total_price(), &self.config.policy);

        OrderSummary {
            lines,
            item_count: cart.total_items(),
            totals,
            currency: self.config.currency,
            total_display: Price::new(totals.total, self.config.currency).display(),
        }
    }

    /// Place an order for the shopper's cart.
    ///
    /// Every outcome is also reported through the shopper's notifier.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` / `EmptyCart` / `MissingFields` / `InvalidEmail`:
    ///   rejected before any write
    /// - `Remote`: the cart could not be read or the order procedure failed;
    ///   nothing was written
    #[instrument(skip(self, shopper, details), fields(session = %shopper.session_id()))]
    pub async fn place_order(
        &self,
        shopper: &ShopperSession,
        details: &ShippingDetails,
        payment_method: PaymentMethod,
    ) -> Result<PlacedOrder, CheckoutError> {
        let notifier = shopper.notifier();

        let Some(identity) = shopper.identity().await? else {
            notifier.push(Notification::error(
                "Authentication Required",
                "Please sign in to place an order",
            ));
            return Err(CheckoutError::NotAuthenticated);
        };

        let scope = Scope::User(identity.id);
        let turn = shopper.cart().enter(scope).await;
        let cart = match shopper.cart().sync(scope, &turn).await {
            Ok(cart) => cart,
            Err(e) => {
                error!(error = %e, "Could not read cart for order");
                notifier.push(Notification::error("Error", ORDER_FAILED));
                return Err(e.into());
            }
        };
        if cart.is_empty() {
            notifier.push(Notification::error("Empty Cart", "Your cart is empty"));
            return Err(CheckoutError::EmptyCart);
        }

        let email = match details.validate() {
            Ok(email) => email,
            Err(e) => {
                let (title, description) = match &e {
                    ShippingError::MissingFields(_) => (
                        "Missing Information",
                        "Please fill in all required shipping details",
                    ),
                    ShippingError::InvalidEmail(_) => {
                        ("Invalid Email", "Please enter a valid email address")
                    }
                };
                notifier.push(Notification::error(title, description));
                return Err(e.into());
            }
        };

        let summary = self.summary(&cart);
        let totals = summary.totals;
        let payment_status = payment_method.initial_status();

        let order = json!({
            "user_id": identity.id,
            "email": email.as_str(),
            "total_amount": totals.total,
            "shipping_amount": totals.shipping,
            "tax_amount": totals.tax,
            "shipping_address": address_snapshot(details, AddressRole::Shipping)?,
            "billing_address": address_snapshot(details, AddressRole::Billing)?,
            "status": OrderStatus::Pending,
            "payment_method": payment_method,
            "payment_status": payment_status,
        });
        let items: Vec<Value> = summary
            .lines
            .iter()
            .map(|line| {
                json!({
                    "product_id": line.product_id,
                    "quantity": line.quantity,
                    "unit_price": line.unit_price,
                    "total_price": line.line_total,
                })
            })
            .collect();

        let order_id = match shopper
            .store()
            .rpc(PLACE_ORDER, json!({ "p_order": order, "p_items": items }))
            .await
            .and_then(|value| serde_json::from_value::<OrderId>(value).map_err(RemoteError::from))
        {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Order error");
                notifier.push(Notification::error("Error", ORDER_FAILED));
                return Err(e.into());
            }
        };

        info!(order = %order_id, total = %totals.total, "order placed");

        // The order stands even if the address book write fails.
        let address = row(json!({
            "user_id": identity.id,
            "type": AddressRole::Shipping,
            "first_name": details.first_name.trim(),
            "last_name": details.last_name.trim(),
            "address_line_1": details.address.trim(),
            "address_line_2": details.landmark.as_deref().map(str::trim),
            "city": details.city.trim(),
            "state": details.state.trim(),
            "postal_code": details.postal_code.trim(),
            "country": details.country.trim(),
        }));
        if let Err(e) = shopper.store().insert(Table::Addresses, vec![address]).await {
            warn!(error = %e, order = %order_id, "Failed to save shipping address");
        }

        shopper.cart().clear_held(scope, &turn).await;
        drop(turn);

        notifier.push(Notification::info(
            "Order Placed Successfully!",
            format!(
                "Your order #{} has been placed with {}. You will receive a confirmation email shortly.",
                order_id.short_ref(),
                payment_method.label()
            ),
        ));

        Ok(PlacedOrder {
            order_id,
            reference: order_id.short_ref(),
            totals,
            payment_method,
            payment_status,
        })
    }
}

/// The form as submitted, tagged with its role, for the order's jsonb columns.
fn address_snapshot(details: &ShippingDetails, role: AddressRole) -> Result<Value, RemoteError> {
    let mut snapshot = serde_json::to_value(details)?;
    if let Value::Object(map) = &mut snapshot {
        map.insert("type".to_owned(), json!(role));
    }
    Ok(snapshot)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use bazaar_core::{AddressType, Email, Product, SessionId};

    use super::*;
    use crate::remote::Connector;
    use crate::remote::memory::{MemoryBackend, Operation};
    use crate::services::gate::ScopeGate;
    use crate::services::notify::Variant;

    fn details() -> ShippingDetails {
        ShippingDetails {
            first_name: "Asha".into(),
            last_name: "Rao".into(),
            email: "asha@example.in".into(),
            phone: "9800000000".into(),
            address: "12 MG Road".into(),
            city: "Pune".into(),
            state: "MH".into(),
            postal_code: "411001".into(),
            country: "India".into(),
            landmark: Some("Near the temple".into()),
            address_type: AddressType::Home,
            instructions: None,
        }
    }

    struct Fixture {
        backend: MemoryBackend,
        shopper: Arc<ShopperSession>,
        kettle: Product,
    }

    async fn signed_in_with_cart() -> Fixture {
        let kettle = Product::new(ProductId::random(), "Kettle", Decimal::new(500, 0));
        let backend = MemoryBackend::new();
        backend
            .seed_products(std::slice::from_ref(&kettle))
            .await
            .unwrap();
        let email = Email::parse("asha@example.in").unwrap();
        backend.register_user(&email, "hunter22").await;

        let shopper = Arc::new(
            ShopperSession::start(SessionId::random(), backend.connect(), &ScopeGate::new()).await,
        );
        shopper.sign_in(&email, "hunter22").await.unwrap();
        shopper.cart().add(&kettle, 2).await;
        shopper.notifier().drain();

        Fixture {
            backend,
            shopper,
            kettle,
        }
    }

    #[tokio::test]
    async fn test_summary_applies_policy() {
        let fixture = signed_in_with_cart().await;
        let summary = CheckoutService::default().summary(&fixture.shopper.cart().snapshot().await);

        assert_eq!(summary.item_count, 2);
        assert_eq!(summary.lines[0].line_total, Decimal::new(1000, 0));
        assert_eq!(summary.totals.total.to_string(), "1230.00");
        assert_eq!(summary.total_display, "₹1230.00");
    }

    #[tokio::test]
    async fn test_place_order_writes_everything_and_clears_cart() {
        let fixture = signed_in_with_cart().await;
        let checkout = CheckoutService::default();

        let placed = checkout
            .place_order(&fixture.shopper, &details(), PaymentMethod::Online)
            .await
            .unwrap();
        assert_eq!(placed.payment_status, PaymentStatus::AwaitingPayment);
        assert_eq!(placed.reference.len(), 8);

        let orders = fixture.backend.rows(Table::Orders).await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0]["total_amount"], json!("1230.00"));
        assert_eq!(orders[0]["payment_status"], json!("awaiting_payment"));
        assert_eq!(orders[0]["shipping_address"]["type"], json!("shipping"));
        assert_eq!(orders[0]["billing_address"]["type"], json!("billing"));

        let items = fixture.backend.rows(Table::OrderItems).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["product_id"], json!(fixture.kettle.id));
        assert_eq!(items[0]["total_price"], json!("1000"));

        let addresses = fixture.backend.rows(Table::Addresses).await;
        assert_eq!(addresses[0]["address_line_2"], json!("Near the temple"));

        assert!(fixture.shopper.cart().snapshot().await.is_empty());
        assert!(fixture.backend.rows(Table::CartItems).await.is_empty());

        let notes = fixture.shopper.notifier().drain();
        let last = notes.last().unwrap();
        assert_eq!(last.title, "Order Placed Successfully!");
        assert!(last.description.contains(&placed.reference));
        assert!(last.description.contains("Online Payment"));
    }

    #[tokio::test]
    async fn test_missing_fields_make_no_write() {
        let fixture = signed_in_with_cart().await;
        let mut form = details();
        form.city = "  ".into();
        fixture.backend.reset_calls().await;

        let err = CheckoutService::default()
            .place_order(&fixture.shopper, &form, PaymentMethod::Cod)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::MissingFields(ref f) if f == &vec!["city"]));

        let writes = fixture
            .backend
            .calls()
            .await
            .into_iter()
            .filter(|c| !matches!(c.operation, Operation::CurrentUser | Operation::Select))
            .count();
        assert_eq!(writes, 0);
        assert_eq!(fixture.shopper.notifier().drain()[0].title, "Missing Information");
    }

    #[tokio::test]
    async fn test_guest_cannot_check_out() {
        let fixture = signed_in_with_cart().await;
        fixture.shopper.sign_out().await.unwrap();

        let err = CheckoutService::default()
            .place_order(&fixture.shopper, &details(), PaymentMethod::Cod)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_failed_procedure_leaves_no_order_and_keeps_cart() {
        let fixture = signed_in_with_cart().await;
        fixture.backend.fail_next(Operation::Rpc, None).await;

        let err = CheckoutService::default()
            .place_order(&fixture.shopper, &details(), PaymentMethod::Cod)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Remote(_)));

        assert!(fixture.backend.rows(Table::Orders).await.is_empty());
        assert!(fixture.backend.rows(Table::OrderItems).await.is_empty());
        assert_eq!(fixture.shopper.cart().total_items().await, 2);

        let notes = fixture.shopper.notifier().drain();
        assert_eq!(notes[0].variant, Variant::Destructive);
        assert_eq!(notes[0].description, "Failed to place order. Please try again.");
    }

    #[tokio::test]
    async fn test_order_prices_remote_rows_not_stale_snapshot() {
        let fixture = signed_in_with_cart().await;
        let email = Email::parse("asha@example.in").unwrap();
        let gate = ScopeGate::new();
        let other = ShopperSession::start(SessionId::random(), fixture.backend.connect(), &gate).await;
        other.sign_in(&email, "hunter22").await.unwrap();
        other.cart().load().await;
        assert_eq!(other.cart().total_items().await, 2);

        // Emptied elsewhere after `other` last read it.
        fixture.shopper.cart().clear().await;
        let err = CheckoutService::default()
            .place_order(&other, &details(), PaymentMethod::Cod)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
        assert!(other.cart().snapshot().await.is_empty());

        // Filled elsewhere after `other` last read it.
        fixture.shopper.cart().add(&fixture.kettle, 3).await;
        let placed = CheckoutService::default()
            .place_order(&other, &details(), PaymentMethod::Cod)
            .await
            .unwrap();
        assert_eq!(placed.totals.subtotal, Decimal::new(1500, 0));
    }

    #[tokio::test]
    async fn test_concurrent_sessions_place_one_order() {
        let kettle = Product::new(ProductId::random(), "Kettle", Decimal::new(500, 0));
        let backend = MemoryBackend::new();
        backend
            .seed_products(std::slice::from_ref(&kettle))
            .await
            .unwrap();
        let email = Email::parse("asha@example.in").unwrap();
        backend.register_user(&email, "hunter22").await;

        let gate = ScopeGate::new();
        let mut sessions = Vec::new();
        for _ in 0..2 {
            let shopper = ShopperSession::start(SessionId::random(), backend.connect(), &gate).await;
            shopper.sign_in(&email, "hunter22").await.unwrap();
            sessions.push(Arc::new(shopper));
        }
        sessions[0].cart().add(&kettle, 2).await;
        sessions[1].cart().load().await;

        let checkout = CheckoutService::default();
        let (details_a, details_b) = (details(), details());
        let (a, b) = tokio::join!(
            checkout.place_order(&sessions[0], &details_a, PaymentMethod::Cod),
            checkout.place_order(&sessions[1], &details_b, PaymentMethod::Cod),
        );

        let placed = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(placed, 1);
        assert!(matches!(a.err().or(b.err()), Some(CheckoutError::EmptyCart)));
        assert_eq!(backend.rows(Table::Orders).await.len(), 1);
        assert!(backend.rows(Table::CartItems).await.is_empty());
    }
}
