//! Per-scope mutation ordering.
//!
//! A cart or wishlist mutation is a remote write followed by a reload. Two
//! such pairs on the same scope must not interleave, or an older reload can
//! overwrite the snapshot produced by a newer write. [`ScopeGate`] hands out
//! one FIFO lock per scope; `tokio::sync::Mutex` queues waiters fairly, so
//! operations apply in arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use bazaar_core::Scope;

/// Registry of per-scope locks shared by every shopper session.
#[derive(Debug, Clone, Default)]
pub struct ScopeGate {
    locks: Arc<Mutex<HashMap<Scope, Weak<AsyncMutex<()>>>>>,
}

/// Held while a scope's write/reload pair runs.
#[derive(Debug)]
pub struct ScopeGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ScopeGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this scope's turn.
    pub async fn enter(&self, scope: Scope) -> ScopeGuard {
        let lock = self.lock_for(scope);
        ScopeGuard {
            _guard: lock.lock_owned().await,
        }
    }

    fn lock_for(&self, scope: Scope) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

        // Locks nobody holds or waits on are dropped here.
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(&scope).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(scope, Arc::downgrade(&lock));
        lock
    }

    /// Scopes with a live lock.
    #[must_use]
    pub fn active_scopes(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bazaar_core::{SessionId, UserId};

    use super::*;

    #[tokio::test]
    async fn test_same_scope_runs_in_arrival_order() {
        let gate = ScopeGate::new();
        let scope = Scope::Guest(SessionId::random());
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = gate.enter(scope).await;

        let mut waiters = Vec::new();
        for i in 0..5 {
            let gate = gate.clone();
            let log = Arc::clone(&log);
            waiters.push(tokio::spawn(async move {
                let _turn = gate.enter(scope).await;
                log.lock().unwrap_or_else(PoisonError::into_inner).push(i);
            }));
            // Let each waiter queue up before spawning the next.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(first);
        for waiter in waiters {
            let _ = waiter.await;
        }

        let order = log.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_distinct_scopes_do_not_block() {
        let gate = ScopeGate::new();
        let _guest = gate.enter(Scope::Guest(SessionId::random())).await;
        let user = tokio::time::timeout(
            Duration::from_millis(100),
            gate.enter(Scope::User(UserId::random())),
        )
        .await;
        assert!(user.is_ok());
    }

    #[tokio::test]
    async fn test_idle_locks_are_reclaimed() {
        let gate = ScopeGate::new();
        {
            let _a = gate.enter(Scope::Guest(SessionId::random())).await;
            let _b = gate.enter(Scope::Guest(SessionId::random())).await;
            assert_eq!(gate.active_scopes(), 2);
        }
        assert_eq!(gate.active_scopes(), 0);
    }
}
