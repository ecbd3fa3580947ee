//! Wishlist state synchronized with the remote `wishlist_items` table.
//!
//! Same discipline as the cart: write, then reload under the scope's turn.
//! Presence is binary; adding an already-wished product leaves one row.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, instrument, warn};

use bazaar_core::{Product, ProductId, Scope, SessionId, WishlistEntryId};

use super::gate::{ScopeGate, ScopeGuard};
use super::notify::{Notification, Notifier};
use super::{Outcome, Phase, resolve_scope, scoped_row};
use crate::remote::{Filter, Query, RemoteError, RemoteStore, Table, from_rows};

pub(crate) const ADD_FAILED: &str = "Failed to add item to wishlist";
const REMOVE_FAILED: &str = "Failed to remove item from wishlist";

/// A wished-for product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WishlistEntry {
    pub id: WishlistEntryId,
    pub product: Product,
}

#[derive(Deserialize)]
struct WishlistRow {
    id: WishlistEntryId,
    #[serde(default)]
    products: Option<Product>,
}

/// Point-in-time view of a shopper's wishlist.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WishlistSnapshot {
    pub entries: Vec<WishlistEntry>,
    pub phase: Phase,
    pub scope: Option<Scope>,
}

impl WishlistSnapshot {
    #[must_use]
    pub fn contains(&self, product_id: ProductId) -> bool {
        self.entries.iter().any(|e| e.product.id == product_id)
    }
}

/// One shopper's wishlist.
pub struct WishlistManager {
    session_id: SessionId,
    store: Arc<dyn RemoteStore>,
    gate: ScopeGate,
    notifier: Notifier,
    state: RwLock<WishlistSnapshot>,
}

impl WishlistManager {
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
            state: RwLock::new(WishlistSnapshot::default()),
        }
    }

    pub async fn snapshot(&self) -> WishlistSnapshot {
        self.state.read().await.clone()
    }

    pub async fn items(&self) -> Vec<Product> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|e| e.product.clone())
            .collect()
    }

    pub async fn contains(&self, product_id: ProductId) -> bool {
        self.state.read().await.contains(product_id)
    }

    /// Whether any load has succeeded yet.
    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.scope.is_some()
    }

    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn load(&self) -> Outcome {
        let scope = match resolve_scope(self.store.as_ref(), self.session_id).await {
            Ok(scope) => scope,
            Err(e) => {
                error!(error = %e, "Error loading wishlist");
                self.state.write().await.phase = Phase::Ready;
                return Outcome::Failed;
            }
        };
        let _turn = self.gate.enter(scope).await;
        self.reload(scope).await
    }

    #[instrument(skip(self, product), fields(session = %self.session_id, product = %product.id))]
    pub async fn add(&self, product: &Product) -> Outcome {
        let Some((scope, _turn)) = self.begin(ADD_FAILED).await else {
            return Outcome::Failed;
        };

        if let Err(e) = self
            .store
            .upsert(
                Table::WishlistItems,
                scoped_row(scope, product.id),
                scope.conflict_key(),
            )
            .await
        {
            return self.fail(&e, ADD_FAILED).await;
        }

        self.reload(scope).await;
        self.notifier.push(Notification::info(
            "Added to wishlist",
            format!("{} has been added to your wishlist", product.name),
        ));
        Outcome::Applied
    }

    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn remove(&self, product_id: ProductId) -> Outcome {
        let entry_id = self
            .state
            .read()
            .await
            .entries
            .iter()
            .find(|e| e.product.id == product_id)
            .map(|e| e.id);
        let Some(entry_id) = entry_id else {
            debug!(%product_id, "product not in wishlist, nothing to remove");
            return Outcome::Skipped;
        };

        let Some((scope, _turn)) = self.begin(REMOVE_FAILED).await else {
            return Outcome::Failed;
        };

        if let Err(e) = self
            .store
            .delete(Table::WishlistItems, &[Filter::eq_id("id", entry_id)])
            .await
        {
            return self.fail(&e, REMOVE_FAILED).await;
        }

        self.reload(scope).await;
        self.notifier.push(Notification::info(
            "Removed from wishlist",
            "Item has been removed from your wishlist",
        ));
        Outcome::Applied
    }

    async fn begin(&self, failure: &str) -> Option<(Scope, ScopeGuard)> {
        match resolve_scope(self.store.as_ref(), self.session_id).await {
            Ok(scope) => {
                let turn = self.gate.enter(scope).await;
                self.state.write().await.phase = Phase::Loading;
                Some((scope, turn))
            }
            Err(e) => {
                error!(error = %e, "Could not resolve wishlist scope");
                self.notifier.push(Notification::error("Error", failure));
                None
            }
        }
    }

    async fn fail(&self, e: &RemoteError, failure: &str) -> Outcome {
        error!(error = %e, "{failure}");
        self.state.write().await.phase = Phase::Ready;
        self.notifier.push(Notification::error("Error", failure));
        Outcome::Failed
    }

    async fn reload(&self, scope: Scope) -> Outcome {
        self.state.write().await.phase = Phase::Loading;

        let query = Query::new()
            .filter(Filter::eq_id(scope.column(), scope.key()))
            .embed("products", Table::Products, "product_id")
            .order_by("created_at", true);
        let fetched = match self.store.select(Table::WishlistItems, &query).await {
            Ok(rows) => from_rows::<WishlistRow>(rows),
            Err(e) => Err(e),
        };

        let mut state = self.state.write().await;
        state.phase = Phase::Ready;
        match fetched {
            Ok(rows) => {
                state.entries = rows
                    .into_iter()
                    .filter_map(|r| match r.products {
                        Some(product) => Some(WishlistEntry { id: r.id, product }),
                        None => {
                            warn!(entry = %r.id, "wishlist entry references a missing product, skipping");
                            None
                        }
                    })
                    .collect();
                state.scope = Some(scope);
                Outcome::Applied
            }
            Err(e) => {
                error!(error = %e, %scope, "Error loading wishlist");
                Outcome::Failed
            }
        }
    }
}
