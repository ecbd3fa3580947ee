//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::config::StorefrontConfig;
use crate::middleware::session::SESSION_EXPIRY_SECONDS;
use crate::remote::Connector;
use crate::services::{Catalog, CheckoutService, ShopperRegistry};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// catalog, the live shopper sessions and checkout.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    catalog: Catalog,
    shoppers: ShopperRegistry,
    checkout: CheckoutService,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The catalog reads through its own anonymous store session. Shopper
    /// sessions are opened on demand and dropped after the same inactivity
    /// window as the session cookie.
    #[must_use]
    pub fn new(config: StorefrontConfig, connector: Arc<dyn Connector>) -> Self {
        let catalog = Catalog::new(connector.connect(), config.catalog_cache_ttl);
        let shoppers = ShopperRegistry::new(
            connector,
            Duration::from_secs(SESSION_EXPIRY_SECONDS.unsigned_abs()),
        );
        let checkout = CheckoutService::new(config.checkout);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                catalog,
                shoppers,
                checkout,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the cached catalog reader.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Get a reference to the live shopper sessions.
    #[must_use]
    pub fn shoppers(&self) -> &ShopperRegistry {
        &self.inner.shoppers
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }
}
