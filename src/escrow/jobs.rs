//! Background jobs

use std::sync::Arc;
use std::time::Duration;

use crate::store::KvStore;

use super::service::SettlementEngine;

/// Orders released per sweep
const RELEASE_BATCH: i64 = 50;

/// Background job for automatic escrow release.
///
/// Requests a payout for every completed, paid order whose escrow is still
/// held or whose last payout failed.
pub async fn escrow_release_job(engine: Arc<SettlementEngine>, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Starting escrow release job");

    loop {
        tokio::time::sleep(interval).await;

        match engine.release_due(RELEASE_BATCH).await {
            Ok(0) => {}
            Ok(requested) => tracing::info!(requested, "Escrow payouts requested"),
            Err(e) => tracing::error!("Error releasing escrow: {}", e),
        }
    }
}

/// Background job that evicts expired OTP, counter and blacklist keys
pub async fn kv_sweeper(kv: Arc<dyn KvStore>, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Starting key sweeper");

    loop {
        tokio::time::sleep(interval).await;

        match kv.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Expired keys purged"),
            Err(e) => tracing::error!("Error purging expired keys: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[tokio::test(start_paused = true)]
    async fn test_kv_sweeper_purges_expired_keys() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("otp:login:254700000001", "123456", Duration::from_secs(5))
            .await
            .unwrap();
        kv.set("blacklist:token", "1", Duration::from_secs(600))
            .await
            .unwrap();

        let job = tokio::spawn(kv_sweeper(kv.clone(), Duration::from_secs(30)));
        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert!(kv.exists("blacklist:token").await.unwrap());
        // The sweeper already removed the expired code
        assert_eq!(kv.purge_expired().await.unwrap(), 0);
        job.abort();
    }
}
