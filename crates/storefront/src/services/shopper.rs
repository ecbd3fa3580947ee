//! Per-shopper session handles.
//!
//! A [`ShopperSession`] owns one store session (and with it the shopper's
//! sign-in state), the cart and wishlist snapshots, and the notification
//! queue. Handlers receive it explicitly. [`ShopperRegistry`] keeps them in
//! a `moka` cache keyed by [`SessionId`]; idle sessions are evicted.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{info, instrument};

use bazaar_core::{Email, SessionId};

use super::cart::CartManager;
use super::gate::ScopeGate;
use super::notify::Notifier;
use super::wishlist::WishlistManager;
use crate::remote::{Connector, Identity, RemoteError, RemoteStore};

/// Upper bound on live shopper sessions.
const MAX_SESSIONS: u64 = 100_000;

/// One shopper's state.
pub struct ShopperSession {
    session_id: SessionId,
    store: Arc<dyn RemoteStore>,
    cart: CartManager,
    wishlist: WishlistManager,
    notifier: Notifier,
}

impl ShopperSession {
    /// Wire up a session without loading anything.
    #[must_use]
    pub fn new(session_id: SessionId, store: Arc<dyn RemoteStore>, gate: &ScopeGate) -> Self {
        let notifier = Notifier::new();
        Self {
            session_id,
            cart: CartManager::new(session_id, Arc::clone(&store), gate.clone(), notifier.clone()),
            wishlist: WishlistManager::new(
                session_id,
                Arc::clone(&store),
                gate.clone(),
                notifier.clone(),
            ),
            store,
            notifier,
        }
    }

    /// Wire up a session and run the initial cart and wishlist loads.
    pub async fn start(session_id: SessionId, store: Arc<dyn RemoteStore>, gate: &ScopeGate) -> Self {
        let session = Self::new(session_id, store, gate);
        session.reload().await;
        session
    }

    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    #[must_use]
    pub const fn cart(&self) -> &CartManager {
        &self.cart
    }

    #[must_use]
    pub const fn wishlist(&self) -> &WishlistManager {
        &self.wishlist
    }

    #[must_use]
    pub const fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// The signed-in user, if any.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the auth lookup fails.
    pub async fn identity(&self) -> Result<Option<Identity>, RemoteError> {
        self.store.current_user().await
    }

    /// Reload cart and wishlist under the current scope.
    pub async fn reload(&self) {
        tokio::join!(self.cart.load(), self.wishlist.load());
    }

    /// Retry whichever initial load has not succeeded yet.
    pub async fn ensure_loaded(&self) {
        tokio::join!(
            async {
                if !self.cart.is_loaded().await {
                    self.cart.load().await;
                }
            },
            async {
                if !self.wishlist.is_loaded().await {
                    self.wishlist.load().await;
                }
            },
        );
    }

    /// Authenticate, then reload under the user's scope.
    ///
    /// Guest rows stay where they are; they are not merged into the user's.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Unauthorized` for bad credentials.
    #[instrument(skip(self, password), fields(session = %self.session_id))]
    pub async fn sign_in(&self, email: &Email, password: &str) -> Result<Identity, RemoteError> {
        let identity = self.store.sign_in(email, password).await?;
        info!(user = %identity.id, "shopper signed in");
        self.reload().await;
        Ok(identity)
    }

    /// Drop credentials, then reload under the guest scope.
    ///
    /// # Errors
    ///
    /// Returns the remote error if revoking the session failed; local
    /// credentials are dropped and the snapshots reloaded regardless.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn sign_out(&self) -> Result<(), RemoteError> {
        let result = self.store.sign_out().await;
        info!("shopper signed out");
        self.reload().await;
        result
    }
}

/// Live shopper sessions.
#[derive(Clone)]
pub struct ShopperRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    connector: Arc<dyn Connector>,
    gate: ScopeGate,
    sessions: Cache<SessionId, Arc<ShopperSession>>,
}

impl ShopperRegistry {
    /// Sessions untouched for `idle` are dropped.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, idle: Duration) -> Self {
        let sessions = Cache::builder()
            .max_capacity(MAX_SESSIONS)
            .time_to_idle(idle)
            .build();

        Self {
            inner: Arc::new(RegistryInner {
                connector,
                gate: ScopeGate::new(),
                sessions,
            }),
        }
    }

    /// The session for `id`, starting it on first use.
    ///
    /// Concurrent first requests for one id share a single start. A session
    /// whose initial load failed retries it on each later lookup.
    pub async fn get_or_start(&self, id: SessionId) -> Arc<ShopperSession> {
        let connector = Arc::clone(&self.inner.connector);
        let gate = self.inner.gate.clone();
        let session = self
            .inner
            .sessions
            .get_with(id, async move {
                info!(session = %id, "starting shopper session");
                Arc::new(ShopperSession::start(id, connector.connect(), &gate).await)
            })
            .await;
        session.ensure_loaded().await;
        session
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<ShopperSession>> {
        self.inner.sessions.get(&id).await
    }

    /// Tear a session down.
    pub async fn end(&self, id: SessionId) {
        self.inner.sessions.invalidate(&id).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use bazaar_core::{Product, ProductId, Scope};

    use super::*;
    use crate::remote::Table;
    use crate::remote::memory::MemoryBackend;
    use crate::services::{Outcome, scoped_row};

    async fn backend_with(product: &Product) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .seed_products(std::slice::from_ref(product))
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_sign_in_switches_scope_without_merge() {
        let tea = Product::new(ProductId::random(), "Tea", Decimal::new(10, 0));
        let backend = backend_with(&tea).await;
        let email = Email::parse("asha@example.in").unwrap();
        let user = backend.register_user(&email, "hunter22").await;

        let shopper = ShopperSession::start(SessionId::random(), backend.connect(), &ScopeGate::new()).await;
        shopper.cart().add(&tea, 2).await;
        shopper.wishlist().add(&tea).await;

        shopper.sign_in(&email, "hunter22").await.unwrap();
        let cart = shopper.cart().snapshot().await;
        assert_eq!(cart.scope, Some(Scope::User(user.id)));
        assert!(cart.is_empty());
        assert!(!shopper.wishlist().contains(tea.id).await);

        shopper.sign_out().await.unwrap();
        let cart = shopper.cart().snapshot().await;
        assert_eq!(cart.scope, Some(Scope::Guest(shopper.session_id())));
        assert_eq!(cart.total_items(), 2);
        assert!(shopper.wishlist().contains(tea.id).await);
    }

    #[tokio::test]
    async fn test_bad_credentials_keep_guest_scope() {
        let tea = Product::new(ProductId::random(), "Tea", Decimal::new(10, 0));
        let backend = backend_with(&tea).await;
        let shopper = ShopperSession::start(SessionId::random(), backend.connect(), &ScopeGate::new()).await;

        let email = Email::parse("nobody@example.in").unwrap();
        assert!(matches!(
            shopper.sign_in(&email, "nope").await,
            Err(RemoteError::Unauthorized(_))
        ));
        assert_eq!(shopper.identity().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_registry_reuses_and_isolates_sessions() {
        let tea = Product::new(ProductId::random(), "Tea", Decimal::new(10, 0));
        let backend = backend_with(&tea).await;
        let registry = ShopperRegistry::new(Arc::new(backend), Duration::from_secs(60));

        let a = SessionId::random();
        let b = SessionId::random();
        registry.get_or_start(a).await.cart().add(&tea, 1).await;

        let again = registry.get_or_start(a).await;
        assert_eq!(again.cart().total_items().await, 1);
        assert_eq!(registry.get_or_start(b).await.cart().total_items().await, 0);

        registry.end(a).await;
        assert!(registry.get(a).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_first_load_is_retried() {
        let tea = Product::new(ProductId::random(), "Tea", Decimal::new(10, 0));
        let backend = backend_with(&tea).await;
        let id = SessionId::random();
        let mut line = scoped_row(Scope::Guest(id), tea.id);
        line.insert("quantity".to_owned(), serde_json::json!(2));
        backend.seed(Table::CartItems, vec![line]).await.unwrap();
        backend
            .seed(Table::WishlistItems, vec![scoped_row(Scope::Guest(id), tea.id)])
            .await
            .unwrap();
        let registry = ShopperRegistry::new(Arc::new(backend.clone()), Duration::from_secs(60));

        backend.set_offline(true).await;
        let shopper = registry.get_or_start(id).await;
        assert!(!shopper.cart().is_loaded().await);
        assert!(shopper.cart().snapshot().await.is_empty());

        backend.set_offline(false).await;
        let shopper = registry.get_or_start(id).await;
        assert!(shopper.cart().is_loaded().await);
        assert_eq!(shopper.cart().total_items().await, 2);
        assert!(shopper.wishlist().contains(tea.id).await);

        assert_eq!(shopper.cart().remove(tea.id).await, Outcome::Applied);
        assert!(backend.rows(Table::CartItems).await.is_empty());
    }
}
