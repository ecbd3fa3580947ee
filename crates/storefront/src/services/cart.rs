//! Cart state synchronized with the remote `cart_items` table.
//!
//! The remote table is the source of truth. Every successful write is
//! followed by a full reload, and the local snapshot is replaced wholesale;
//! there is no optimistic update. `clear` is the one exception: after the
//! scope's rows are deleted the snapshot is emptied directly.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, error, instrument, warn};

use bazaar_core::{CartLineId, Product, ProductId, Scope, SessionId};

use super::gate::{ScopeGate, ScopeGuard};
use super::notify::{Notification, Notifier};
use super::{Outcome, Phase, resolve_scope, scoped_row};
use crate::remote::{Filter, Query, RemoteError, RemoteStore, Table, from_rows, row};

pub(crate) const ADD_FAILED: &str = "Failed to add item to cart";
const REMOVE_FAILED: &str = "Failed to remove item from cart";
const UPDATE_FAILED: &str = "Failed to update quantity";
const CLEAR_FAILED: &str = "Failed to clear cart";

/// One product in the cart, with the product as read alongside the line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    /// Remote row id; used for row-level update and delete.
    pub id: CartLineId,
    pub product: Product,
    pub quantity: u32,
}

impl CartLine {
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        self.product.id
    }

    /// Unit price times quantity, unrounded.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.product.price * Decimal::from(self.quantity)
    }
}

#[derive(Deserialize)]
struct CartRow {
    id: CartLineId,
    quantity: u32,
    #[serde(default)]
    products: Option<Product>,
}

/// Point-in-time view of a shopper's cart.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
    pub phase: Phase,
    /// Whether the cart drawer is shown. Never synchronized.
    pub is_open: bool,
    /// Scope of the last successful load.
    pub scope: Option<Scope>,
}

impl CartSnapshot {
    /// Sum of price times quantity over all lines.
    #[must_use]
    pub fn total_price(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Sum of quantities over all lines.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }

    #[must_use]
    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id() == product_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// One shopper's cart.
pub struct CartManager {
    session_id: SessionId,
    store: Arc<dyn RemoteStore>,
    gate: ScopeGate,
    notifier: Notifier,
    state: RwLock<CartSnapshot>,
}

impl CartManager {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        store: Arc<dyn RemoteStore>,
        gate: ScopeGate,
        notifier: Notifier,
    ) -> Self {
        Self {
            session_id,
            store,
            gate,
            notifier,
            state: RwLock::new(CartSnapshot::default()),
        }
    }

    /// Copy of the current snapshot.
    pub async fn snapshot(&self) -> CartSnapshot {
        self.state.read().await.clone()
    }

    pub async fn total_price(&self) -> Decimal {
        self.state.read().await.total_price()
    }

    pub async fn total_items(&self) -> u64 {
        self.state.read().await.total_items()
    }

    /// Whether any load has succeeded yet.
    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.scope.is_some()
    }

    /// Replace the snapshot with the scope's remote rows.
    ///
    /// On failure the error is logged and the snapshot is left as it was.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn load(&self) -> Outcome {
        let scope = match resolve_scope(self.store.as_ref(), self.session_id).await {
            Ok(scope) => scope,
            Err(e) => {
                error!(error = %e, "Error loading cart");
                self.set_phase(Phase::Ready).await;
                return Outcome::Failed;
            }
        };
        let turn = self.gate.enter(scope).await;
        self.reload(scope, &turn).await
    }

    /// Put `quantity` of `product` in the cart.
    ///
    /// The remote row's quantity is set to `quantity`, not incremented. A
    /// quantity of zero removes the line.
    #[instrument(skip(self, product), fields(session = %self.session_id, product = %product.id))]
    pub async fn add(&self, product: &Product, quantity: u32) -> Outcome {
        if quantity == 0 {
            return self.remove(product.id).await;
        }

        let Some((scope, turn)) = self.begin(ADD_FAILED).await else {
            return Outcome::Failed;
        };

        let mut line = scoped_row(scope, product.id);
        line.insert("quantity".to_owned(), json!(quantity));

        if let Err(e) = self
            .store
            .upsert(Table::CartItems, line, scope.conflict_key())
            .await
        {
            return self.fail(&e, ADD_FAILED).await;
        }

        self.reload(scope, &turn).await;
        self.notifier.push(Notification::info(
            "Added to cart",
            format!("{} has been added to your cart", product.name),
        ));
        Outcome::Applied
    }

    /// Delete the line for `product_id`. No-op if it is not in the cart.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn remove(&self, product_id: ProductId) -> Outcome {
        let Some(line_id) = self.line_id(product_id).await else {
            debug!(%product_id, "product not in cart, nothing to remove");
            return Outcome::Skipped;
        };

        let Some((scope, turn)) = self.begin(REMOVE_FAILED).await else {
            return Outcome::Failed;
        };

        if let Err(e) = self
            .store
            .delete(Table::CartItems, &[Filter::eq_id("id", line_id)])
            .await
        {
            return self.fail(&e, REMOVE_FAILED).await;
        }

        self.reload(scope, &turn).await;
        self.notifier.push(Notification::info(
            "Removed from cart",
            "Item has been removed from your cart",
        ));
        Outcome::Applied
    }

    /// Set the line's quantity. Zero or less removes the line.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn set_quantity(&self, product_id: ProductId, quantity: i32) -> Outcome {
        let quantity = match u32::try_from(quantity) {
            Ok(0) | Err(_) => return self.remove(product_id).await,
            Ok(quantity) => quantity,
        };

        let Some(line_id) = self.line_id(product_id).await else {
            debug!(%product_id, "product not in cart, nothing to update");
            return Outcome::Skipped;
        };

        let Some((scope, turn)) = self.begin(UPDATE_FAILED).await else {
            return Outcome::Failed;
        };

        if let Err(e) = self
            .store
            .update(
                Table::CartItems,
                &[Filter::eq_id("id", line_id)],
                row(json!({ "quantity": quantity })),
            )
            .await
        {
            return self.fail(&e, UPDATE_FAILED).await;
        }

        self.reload(scope, &turn).await;
        Outcome::Applied
    }

    /// Delete every row of the current scope and empty the snapshot.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn clear(&self) -> Outcome {
        let Some((scope, turn)) = self.begin(CLEAR_FAILED).await else {
            return Outcome::Failed;
        };
        self.clear_held(scope, &turn).await
    }

    /// Wait for `scope`'s turn. Used by callers that need several cart
    /// steps to run without another write in between.
    pub(crate) async fn enter(&self, scope: Scope) -> ScopeGuard {
        self.gate.enter(scope).await
    }

    /// Reload from the remote rows and return the fresh snapshot.
    pub(crate) async fn sync(
        &self,
        scope: Scope,
        _turn: &ScopeGuard,
    ) -> Result<CartSnapshot, RemoteError> {
        self.set_phase(Phase::Loading).await;
        let fetched = self.fetch(scope).await;

        let mut state = self.state.write().await;
        state.phase = Phase::Ready;
        let lines = fetched?;
        debug!(lines = lines.len(), %scope, "cart loaded");
        state.lines = lines;
        state.scope = Some(scope);
        Ok(state.clone())
    }

    /// `clear` for a caller already holding `scope`'s turn.
    pub(crate) async fn clear_held(&self, scope: Scope, _turn: &ScopeGuard) -> Outcome {
        self.set_phase(Phase::Loading).await;
        if let Err(e) = self
            .store
            .delete(
                Table::CartItems,
                &[Filter::eq_id(scope.column(), scope.key())],
            )
            .await
        {
            return self.fail(&e, CLEAR_FAILED).await;
        }

        {
            let mut state = self.state.write().await;
            state.lines.clear();
            state.scope = Some(scope);
            state.phase = Phase::Ready;
        }
        self.notifier.push(Notification::info(
            "Cart cleared",
            "All items have been removed from your cart",
        ));
        Outcome::Applied
    }

    pub async fn is_open(&self) -> bool {
        self.state.read().await.is_open
    }

    pub async fn set_open(&self, open: bool) {
        self.state.write().await.is_open = open;
    }

    /// Flip visibility, returning the new value.
    pub async fn toggle_open(&self) -> bool {
        let mut state = self.state.write().await;
        state.is_open = !state.is_open;
        state.is_open
    }

    async fn line_id(&self, product_id: ProductId) -> Option<CartLineId> {
        self.state.read().await.line(product_id).map(|l| l.id)
    }

    async fn set_phase(&self, phase: Phase) {
        self.state.write().await.phase = phase;
    }

    /// Resolve the scope and wait for its turn.
    async fn begin(&self, failure: &str) -> Option<(Scope, ScopeGuard)> {
        match resolve_scope(self.store.as_ref(), self.session_id).await {
            Ok(scope) => {
                let turn = self.gate.enter(scope).await;
                self.set_phase(Phase::Loading).await;
                Some((scope, turn))
            }
            Err(e) => {
                error!(error = %e, "Could not resolve cart scope");
                self.notifier.push(Notification::error("Error", failure));
                None
            }
        }
    }

    async fn fail(&self, e: &RemoteError, failure: &str) -> Outcome {
        error!(error = %e, "{failure}");
        self.set_phase(Phase::Ready).await;
        self.notifier.push(Notification::error("Error", failure));
        Outcome::Failed
    }

    async fn reload(&self, scope: Scope, turn: &ScopeGuard) -> Outcome {
        match self.sync(scope, turn).await {
            Ok(_) => Outcome::Applied,
            Err(e) => {
                error!(error = %e, %scope, "Error loading cart");
                Outcome::Failed
            }
        }
    }

    async fn fetch(&self, scope: Scope) -> Result<Vec<CartLine>, RemoteError> {
        let query = Query::new()
            .filter(Filter::eq_id(scope.column(), scope.key()))
            .embed("products", Table::Products, "product_id")
            .order_by("created_at", true);

        let rows: Vec<CartRow> = from_rows(self.store.select(Table::CartItems, &query).await?)?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let Some(product) = r.products else {
                    warn!(line = %r.id, "cart line references a missing product, skipping");
                    return None;
                };
                Some(CartLine {
                    id: r.id,
                    product,
                    quantity: r.quantity,
                })
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bazaar_core::Email;

    use super::*;
    use crate::remote::Connector;
    use crate::remote::memory::{MemoryBackend, Operation};
    use crate::services::notify::Variant;

    fn product(name: &str, price: i64) -> Product {
        Product::new(ProductId::random(), name, Decimal::new(price, 0))
    }

    async fn setup(products: &[Product]) -> (MemoryBackend, Arc<CartManager>, Notifier) {
        let backend = MemoryBackend::new();
        backend.seed_products(products).await.unwrap();
        let notifier = Notifier::new();
        let cart = CartManager::new(
            SessionId::random(),
            backend.connect(),
            ScopeGate::new(),
            notifier.clone(),
        );
        assert_eq!(cart.load().await, Outcome::Applied);
        (backend, Arc::new(cart), notifier)
    }

    #[tokio::test]
    async fn test_totals_over_lines() {
        let a = product("Cardamom", 10);
        let b = product("Saffron", 25);
        let (_backend, cart, _) = setup(&[a.clone(), b.clone()]).await;

        cart.add(&a, 2).await;
        cart.add(&b, 1).await;

        assert_eq!(cart.total_price().await, Decimal::new(45, 0));
        assert_eq!(cart.total_items().await, 3);
    }

    #[tokio::test]
    async fn test_add_sets_rather_than_increments() {
        let tea = product("Tea", 10);
        let (backend, cart, notifier) = setup(std::slice::from_ref(&tea)).await;

        assert_eq!(cart.add(&tea, 2).await, Outcome::Applied);
        assert_eq!(cart.add(&tea, 5).await, Outcome::Applied);

        let snapshot = cart.snapshot().await;
        assert_eq!(snapshot.lines.len(), 1);
        assert_eq!(snapshot.lines[0].quantity, 5);
        assert_eq!(backend.rows(Table::CartItems).await.len(), 1);

        let notes = notifier.drain();
        assert_eq!(notes[0].title, "Added to cart");
        assert_eq!(notes[0].description, "Tea has been added to your cart");
    }

    #[tokio::test]
    async fn test_zero_quantity_is_removal() {
        let tea = product("Tea", 10);
        let (_backend, cart, _) = setup(std::slice::from_ref(&tea)).await;

        cart.add(&tea, 3).await;
        assert_eq!(cart.set_quantity(tea.id, 0).await, Outcome::Applied);
        assert!(cart.snapshot().await.is_empty());

        cart.add(&tea, 3).await;
        assert_eq!(cart.set_quantity(tea.id, -4).await, Outcome::Applied);
        assert!(cart.snapshot().await.is_empty());

        cart.add(&tea, 3).await;
        assert_eq!(cart.add(&tea, 0).await, Outcome::Applied);
        assert!(cart.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_quantity_updates_line() {
        let tea = product("Tea", 10);
        let (_backend, cart, _) = setup(std::slice::from_ref(&tea)).await;

        cart.add(&tea, 1).await;
        assert_eq!(cart.set_quantity(tea.id, 4).await, Outcome::Applied);
        assert_eq!(cart.total_items().await, 4);
        assert_eq!(cart.total_price().await, Decimal::new(40, 0));
    }

    #[tokio::test]
    async fn test_remove_absent_makes_no_remote_call() {
        let tea = product("Tea", 10);
        let (backend, cart, notifier) = setup(std::slice::from_ref(&tea)).await;
        backend.reset_calls().await;

        assert_eq!(cart.remove(tea.id).await, Outcome::Skipped);
        assert_eq!(cart.set_quantity(tea.id, 3).await, Outcome::Skipped);

        assert!(backend.calls().await.is_empty());
        assert!(notifier.is_empty());
    }

    #[tokio::test]
    async fn test_clear_then_load_is_empty() {
        let tea = product("Tea", 10);
        let coffee = product("Coffee", 12);
        let (backend, cart, notifier) = setup(&[tea.clone(), coffee.clone()]).await;

        cart.add(&tea, 1).await;
        cart.add(&coffee, 2).await;
        notifier.drain();

        assert_eq!(cart.clear().await, Outcome::Applied);
        assert!(cart.snapshot().await.is_empty());
        assert_eq!(notifier.drain()[0].title, "Cart cleared");

        cart.load().await;
        assert!(cart.snapshot().await.is_empty());
        assert!(backend.rows(Table::CartItems).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_add_leaves_snapshot_and_notifies() {
        let tea = product("Tea", 10);
        let coffee = product("Coffee", 12);
        let (backend, cart, notifier) = setup(&[tea.clone(), coffee.clone()]).await;
        cart.add(&tea, 1).await;
        notifier.drain();
        let before = cart.snapshot().await;

        backend
            .fail_next(Operation::Upsert, Some(Table::CartItems))
            .await;
        assert_eq!(cart.add(&coffee, 1).await, Outcome::Failed);

        let after = cart.snapshot().await;
        assert_eq!(after.lines, before.lines);
        assert_eq!(after.phase, Phase::Ready);

        let notes = notifier.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].variant, Variant::Destructive);
        assert_eq!(notes[0].description, "Failed to add item to cart");
    }

    #[tokio::test]
    async fn test_failed_clear_keeps_lines_and_notifies() {
        let tea = product("Tea", 10);
        let (backend, cart, notifier) = setup(std::slice::from_ref(&tea)).await;
        cart.add(&tea, 2).await;
        notifier.drain();

        backend
            .fail_next(Operation::Delete, Some(Table::CartItems))
            .await;
        assert_eq!(cart.clear().await, Outcome::Failed);

        let snapshot = cart.snapshot().await;
        assert_eq!(snapshot.total_items(), 2);
        assert_eq!(snapshot.phase, Phase::Ready);
        assert_eq!(backend.rows(Table::CartItems).await.len(), 1);

        let notes = notifier.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].variant, Variant::Destructive);
        assert_eq!(notes[0].description, "Failed to clear cart");
    }

    #[tokio::test]
    async fn test_mixed_sequence_matches_remote_rows() {
        let tea = product("Tea", 10);
        let coffee = product("Coffee", 12);
        let cocoa = product("Cocoa", 7);
        let (backend, cart, _) = setup(&[tea.clone(), coffee.clone(), cocoa.clone()]).await;

        cart.add(&tea, 1).await;
        cart.add(&coffee, 3).await;
        cart.set_quantity(tea.id, 4).await;
        cart.add(&cocoa, 2).await;
        cart.remove(coffee.id).await;
        cart.set_quantity(cocoa.id, 0).await;
        cart.add(&coffee, 1).await;

        let snapshot = cart.snapshot().await;
        let mut local: Vec<(ProductId, u32)> = snapshot
            .lines
            .iter()
            .map(|l| (l.product_id(), l.quantity))
            .collect();
        local.sort();
        let mut expected = vec![(tea.id, 4), (coffee.id, 1)];
        expected.sort();
        assert_eq!(local, expected);
        assert_eq!(snapshot.total_price(), Decimal::new(52, 0));

        let remote = backend.rows(Table::CartItems).await;
        assert_eq!(remote.len(), snapshot.lines.len());
        for line in &snapshot.lines {
            let stored = remote
                .iter()
                .find(|r| r["product_id"] == json!(line.product_id()))
                .unwrap();
            assert_eq!(stored["quantity"], json!(line.quantity));
        }
    }

    #[tokio::test]
    async fn test_sync_under_held_turn_reads_other_writers() {
        let tea = product("Tea", 10);
        let (backend, cart, _) = setup(std::slice::from_ref(&tea)).await;
        let scope = cart.snapshot().await.scope.unwrap();
        let other = CartManager::new(
            match scope {
                Scope::Guest(id) => id,
                Scope::User(_) => unreachable!(),
            },
            backend.connect(),
            cart.gate.clone(),
            Notifier::new(),
        );
        other.add(&tea, 3).await;
        assert!(cart.snapshot().await.is_empty());

        let turn = cart.enter(scope).await;
        let fresh = cart.sync(scope, &turn).await.unwrap();
        assert_eq!(fresh.total_items(), 3);
        assert_eq!(cart.clear_held(scope, &turn).await, Outcome::Applied);
        drop(turn);

        assert!(backend.rows(Table::CartItems).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_keeps_snapshot_silently() {
        let tea = product("Tea", 10);
        let (backend, cart, notifier) = setup(std::slice::from_ref(&tea)).await;
        cart.add(&tea, 2).await;
        notifier.drain();

        backend.set_offline(true).await;
        assert_eq!(cart.load().await, Outcome::Failed);
        assert_eq!(cart.total_items().await, 2);
        assert!(notifier.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_mutations_converge_to_remote_rows() {
        let products: Vec<Product> = (0..4).map(|i| product(&format!("p{i}"), 5 + i)).collect();
        let (backend, cart, _) = setup(&products).await;

        let mut tasks = Vec::new();
        for (i, p) in products.iter().cycle().take(12).enumerate() {
            let cart = Arc::clone(&cart);
            let p = p.clone();
            tasks.push(tokio::spawn(async move {
                cart.add(&p, u32::try_from(i).unwrap() + 1).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), Outcome::Applied);
        }

        let remote = backend.rows(Table::CartItems).await;
        let snapshot = cart.snapshot().await;
        assert_eq!(snapshot.lines.len(), remote.len());
        for line in &snapshot.lines {
            let stored = remote
                .iter()
                .find(|r| r["id"] == json!(line.id))
                .unwrap();
            assert_eq!(stored["quantity"], json!(line.quantity));
        }
    }

    #[tokio::test]
    async fn test_signed_in_scope_does_not_see_guest_rows() {
        let tea = product("Tea", 10);
        let (backend, cart, _) = setup(std::slice::from_ref(&tea)).await;
        cart.add(&tea, 2).await;

        let email = Email::parse("asha@example.in").unwrap();
        backend.register_user(&email, "hunter22").await;
        cart.store.sign_in(&email, "hunter22").await.unwrap();
        cart.load().await;

        let snapshot = cart.snapshot().await;
        assert!(snapshot.is_empty());
        assert!(matches!(snapshot.scope, Some(Scope::User(_))));
        assert_eq!(backend.rows(Table::CartItems).await.len(), 1);
    }

    #[tokio::test]
    async fn test_visibility_is_local() {
        let (backend, cart, _) = setup(&[]).await;
        backend.reset_calls().await;

        assert!(!cart.is_open().await);
        assert!(cart.toggle_open().await);
        cart.set_open(false).await;
        assert!(!cart.is_open().await);
        assert!(backend.calls().await.is_empty());
    }
}
