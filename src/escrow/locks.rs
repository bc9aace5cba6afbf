//! Per-order serialization within one process

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Keyed async mutex. Holding the guard for an order excludes every other
/// settlement operation on that order in this process.
#[derive(Default)]
pub struct OrderLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, order_id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop mutexes nobody holds or waits on
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
        before.saturating_sub(self.locks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_order_is_serialized() {
        let locks = Arc::new(OrderLocks::new());
        let id = Uuid::new_v4();
        let guard = locks.lock(id).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_orders_do_not_block() {
        let locks = OrderLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let _b = locks.lock(Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = OrderLocks::new();
        let held = locks.lock(Uuid::new_v4()).await;
        drop(locks.lock(Uuid::new_v4()).await);
        assert_eq!(locks.prune(), 1);
        drop(held);
        assert_eq!(locks.prune(), 1);
    }
}
