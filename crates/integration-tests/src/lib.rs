//! Integration tests for Bazaar.
//!
//! The storefront router is driven in-process with `tower::ServiceExt::oneshot`
//! against the in-memory table store, so the suite needs no database or
//! network.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p bazaar-integration-tests
//! ```
//!
//! # Test Files
//!
//! - `cart_sync` - cart mutations, totals, failures and concurrency
//! - `wishlist` - wishlist membership and scoping
//! - `checkout` - sign-in, order summary and order placement
//! - `http_api` - catalog endpoints, notifications and plumbing

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

use bazaar_core::{Category, CategoryId, Email, Product, ProductId};
use bazaar_storefront::config::{CheckoutConfig, RemoteStoreConfig, StorefrontConfig};
use bazaar_storefront::remote::Identity;
use bazaar_storefront::remote::memory::MemoryBackend;
use bazaar_storefront::state::AppState;

/// Password given to every account created by [`TestContext::register`].
pub const PASSWORD: &str = "correct-horse-battery";

/// Storefront configuration pointing at nothing; the in-memory connector is
/// passed in directly.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        host: "127.0.0.1".parse().unwrap(),
        port: 3000,
        base_url: "http://localhost:3000".to_string(),
        remote: RemoteStoreConfig {
            url: "https://store.local".parse().unwrap(),
            anon_key: SecretString::from("eyJhbGciOiJIUzI1NiJ9.aW50ZWdyYXRpb24.Qm9x7"),
            timeout: None,
        },
        checkout: CheckoutConfig::default(),
        catalog_cache_ttl: Duration::from_secs(60),
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// A seeded store and the router in front of it.
pub struct TestContext {
    pub backend: MemoryBackend,
    pub state: AppState,
    pub app: Router,
    pub spices: Category,
    pub tea: Category,
    /// Tea, 10.00.
    pub chai: Product,
    /// Spices, 25.00, marked down from 50.00.
    pub saffron: Product,
    /// Spices, 1000.00.
    pub pepper_mill: Product,
    /// Tea, 5.00, out of stock.
    pub matcha: Product,
}

impl TestContext {
    pub async fn new() -> Self {
        let backend = MemoryBackend::new();

        let spices = Category::new(CategoryId::random(), "Spices");
        let tea = Category::new(CategoryId::random(), "Tea");
        backend
            .seed_categories(&[spices.clone(), tea.clone()])
            .await
            .unwrap();

        let chai = product("Masala Chai", "10", Some(&tea), 1, "4.2");
        let mut saffron = product("Kashmiri Saffron", "25", Some(&spices), 2, "4.9");
        saffron.compare_price = Some(Decimal::new(50, 0));
        let pepper_mill = product("Pepper Mill", "1000", Some(&spices), 3, "3.8");
        let mut matcha = product("Ceremonial Matcha", "5", Some(&tea), 4, "4.5");
        matcha.in_stock = Some(false);
        backend
            .seed_products(&[
                chai.clone(),
                saffron.clone(),
                pepper_mill.clone(),
                matcha.clone(),
            ])
            .await
            .unwrap();

        let state = AppState::new(test_config(), Arc::new(backend.clone()));
        let app = bazaar_storefront::app(state.clone());

        Self {
            backend,
            state,
            app,
            spices,
            tea,
            chai,
            saffron,
            pepper_mill,
            matcha,
        }
    }

    /// A fresh visitor with no cookie yet.
    #[must_use]
    pub fn client(&self) -> Client {
        Client {
            app: self.app.clone(),
            cookie: None,
        }
    }

    /// Create an account that can sign in with [`PASSWORD`].
    pub async fn register(&self, email: &str) -> Identity {
        self.backend
            .register_user(&Email::parse(email).unwrap(), PASSWORD)
            .await
    }
}

fn product(name: &str, price: &str, category: Option<&Category>, day: u32, rating: &str) -> Product {
    let mut product = Product::new(ProductId::random(), name, price.parse::<Decimal>().unwrap());
    product.category_id = category.map(|c| c.id);
    product.rating = Some(rating.parse().unwrap());
    product.created_at = Some(
        format!("2026-01-{day:02}T09:00:00Z")
            .parse()
            .unwrap(),
    );
    product
}

/// A visitor: the router plus whatever session cookie it was handed.
#[derive(Clone)]
pub struct Client {
    app: Router,
    cookie: Option<String>,
}

/// Status and decoded body of one exchange.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// JSON body; plain text bodies become a JSON string, empty ones `null`.
    pub body: Value,
}

impl Client {
    pub async fn get(&mut self, path: &str) -> Response {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&mut self, path: &str, body: Value) -> Response {
        self.send(Method::POST, path, Some(body)).await
    }

    /// POST without a body.
    pub async fn post_empty(&mut self, path: &str) -> Response {
        self.send(Method::POST, path, None).await
    }

    /// Sign in with [`PASSWORD`].
    pub async fn login(&mut self, email: &str) -> Response {
        self.post(
            "/auth/login",
            serde_json::json!({ "email": email, "password": PASSWORD }),
        )
        .await
    }

    async fn send(&mut self, method: Method, path: &str, body: Option<Value>) -> Response {
        let mut request = Request::builder().method(method).uri(path);
        if let Some(cookie) = &self.cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();

        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            self.cookie = Some(pair.to_owned());
        }

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Response { status, body }
    }
}

/// Titles of the notifications in a mutation response.
#[must_use]
pub fn notification_titles(body: &Value) -> Vec<String> {
    body["notifications"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|n| n["title"].as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}
