//! Sign-in, order summary and order placement through the HTTP API.

use serde_json::{Value, json};

use bazaar_integration_tests::{TestContext, notification_titles};
use bazaar_storefront::remote::Table;
use bazaar_storefront::remote::memory::Operation;

fn shipping() -> Value {
    json!({
        "first_name": "Asha",
        "last_name": "Rao",
        "email": "asha@example.in",
        "phone": "9800000000",
        "address": "12 MG Road",
        "city": "Pune",
        "state": "MH",
        "postal_code": "411001",
        "landmark": "Opposite the post office"
    })
}

#[tokio::test]
async fn test_guest_cannot_see_summary_or_order() {
    let ctx = TestContext::new().await;
    let mut guest = ctx.client();
    guest
        .post("/api/cart/add", json!({ "product_id": ctx.chai.id }))
        .await;

    assert_eq!(guest.get("/api/checkout").await.status, 401);

    let order = guest
        .post("/api/checkout", json!({ "shipping": shipping() }))
        .await;
    assert_eq!(order.status, 401);

    let pending = guest.get("/api/notifications").await;
    assert_eq!(pending.body[0]["title"], "Authentication Required");
    assert!(ctx.backend.rows(Table::Orders).await.is_empty());
}

#[tokio::test]
async fn test_login_rejects_bad_password() {
    let ctx = TestContext::new().await;
    ctx.register("asha@example.in").await;
    let mut shopper = ctx.client();

    let response = shopper
        .post(
            "/auth/login",
            json!({ "email": "asha@example.in", "password": "wrong" }),
        )
        .await;
    assert_eq!(response.status, 401);
    assert_eq!(response.body["error"], "Invalid credentials");
    assert_eq!(shopper.get("/auth/me").await.body, Value::Null);

    let malformed = shopper
        .post("/auth/login", json!({ "email": "asha", "password": "x" }))
        .await;
    assert_eq!(malformed.status, 400);
}

#[tokio::test]
async fn test_summary_applies_shipping_and_tax() {
    let ctx = TestContext::new().await;
    let user = ctx.register("asha@example.in").await;
    let mut shopper = ctx.client();

    let login = shopper.login("asha@example.in").await;
    assert_eq!(login.body["user"]["id"], json!(user.id));
    assert_eq!(shopper.get("/auth/me").await.body["email"], "asha@example.in");

    shopper
        .post("/api/cart/add", json!({ "product_id": ctx.pepper_mill.id }))
        .await;

    let summary = shopper.get("/api/checkout").await;
    assert_eq!(summary.status, 200);
    assert_eq!(summary.body["item_count"], 1);
    assert_eq!(summary.body["totals"]["subtotal"], "1000.00");
    assert_eq!(summary.body["totals"]["total"], "1230.00");
    assert_eq!(summary.body["total_display"], "₹1230.00");
}

#[tokio::test]
async fn test_place_order_writes_order_and_empties_cart() {
    let ctx = TestContext::new().await;
    let user = ctx.register("asha@example.in").await;
    let mut shopper = ctx.client();
    shopper.login("asha@example.in").await;

    shopper
        .post("/api/cart/add", json!({ "product_id": ctx.pepper_mill.id }))
        .await;

    let placed = shopper
        .post(
            "/api/checkout",
            json!({ "shipping": shipping(), "payment_method": "online" }),
        )
        .await;
    assert_eq!(placed.status, 201, "{:?}", placed.body);
    assert_eq!(placed.body["order"]["payment_status"], "awaiting_payment");
    assert_eq!(placed.body["cart"]["lines"], json!([]));
    assert!(
        notification_titles(&placed.body).contains(&"Order Placed Successfully!".to_string())
    );

    let reference = placed.body["order"]["reference"].as_str().unwrap();
    assert_eq!(reference.len(), 8);

    let orders = ctx.backend.rows(Table::Orders).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["user_id"], json!(user.id));
    assert_eq!(orders[0]["total_amount"], "1230.00");
    assert_eq!(orders[0]["shipping_address"]["type"], "shipping");
    assert_eq!(orders[0]["billing_address"]["type"], "billing");

    let items = ctx.backend.rows(Table::OrderItems).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["order_id"], orders[0]["id"]);

    assert_eq!(ctx.backend.rows(Table::Addresses).await.len(), 1);
    assert!(ctx.backend.rows(Table::CartItems).await.is_empty());
}

#[tokio::test]
async fn test_missing_fields_are_listed() {
    let ctx = TestContext::new().await;
    ctx.register("asha@example.in").await;
    let mut shopper = ctx.client();
    shopper.login("asha@example.in").await;
    shopper
        .post("/api/cart/add", json!({ "product_id": ctx.chai.id }))
        .await;

    let mut form = shipping();
    form["city"] = json!("  ");
    let response = shopper
        .post("/api/checkout", json!({ "shipping": form }))
        .await;

    assert_eq!(response.status, 422);
    assert!(response.body["error"].as_str().unwrap().contains("city"));
    let pending = shopper.get("/api/notifications").await;
    assert_eq!(pending.body[0]["title"], "Missing Information");
    assert_eq!(shopper.get("/api/cart/count").await.body["count"], 1);
}

#[tokio::test]
async fn test_failed_order_call_leaves_no_rows_and_keeps_cart() {
    let ctx = TestContext::new().await;
    ctx.register("asha@example.in").await;
    let mut shopper = ctx.client();
    shopper.login("asha@example.in").await;
    shopper
        .post("/api/cart/add", json!({ "product_id": ctx.saffron.id, "quantity": 2 }))
        .await;

    ctx.backend.fail_next(Operation::Rpc, None).await;
    let response = shopper
        .post("/api/checkout", json!({ "shipping": shipping() }))
        .await;

    assert_eq!(response.status, 502);
    assert!(ctx.backend.rows(Table::Orders).await.is_empty());
    assert!(ctx.backend.rows(Table::OrderItems).await.is_empty());
    assert_eq!(shopper.get("/api/cart/count").await.body["count"], 2);

    let pending = shopper.get("/api/notifications").await;
    assert_eq!(
        pending.body[0]["description"],
        "Failed to place order. Please try again."
    );
}

#[tokio::test]
async fn test_empty_cart_is_rejected() {
    let ctx = TestContext::new().await;
    ctx.register("asha@example.in").await;
    let mut shopper = ctx.client();
    shopper.login("asha@example.in").await;

    let response = shopper
        .post("/api/checkout", json!({ "shipping": shipping() }))
        .await;
    assert_eq!(response.status, 409);
}

#[tokio::test]
async fn test_second_session_cannot_reorder_checked_out_cart() {
    let ctx = TestContext::new().await;
    ctx.register("asha@example.in").await;
    let mut laptop = ctx.client();
    let mut phone = ctx.client();
    laptop.login("asha@example.in").await;
    phone.login("asha@example.in").await;

    laptop
        .post("/api/cart/add", json!({ "product_id": ctx.chai.id, "quantity": 2 }))
        .await;
    assert_eq!(phone.get("/api/cart").await.body["total_items"], 2);
    assert_eq!(phone.get("/api/checkout").await.body["item_count"], 2);

    let first = laptop
        .post("/api/checkout", json!({ "shipping": shipping() }))
        .await;
    assert_eq!(first.status, 201, "{:?}", first.body);

    let second = phone
        .post("/api/checkout", json!({ "shipping": shipping() }))
        .await;
    assert_eq!(second.status, 409);
    assert_eq!(ctx.backend.rows(Table::Orders).await.len(), 1);
    assert_eq!(phone.get("/api/cart/count").await.body["count"], 0);
}
