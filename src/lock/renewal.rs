use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dao::lease_store::{LeaseStore, LeaseToken};

/// Background task keeping one lease alive while its holder works.
///
/// A single task renews on a fixed interval until [`stop`](Self::stop) cancels
/// and joins it, so no renewal can race the subsequent release. A failed
/// renewal is logged and ends the task; the lease then lapses on its own.
pub struct RenewalSupervisor {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Shortest renewal period; `interval_at` rejects zero.
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(1);

impl RenewalSupervisor {
    /// Renew `key` every `every` for another `ttl` until stopped.
    pub fn spawn(
        store: Arc<dyn LeaseStore>,
        key: String,
        token: LeaseToken,
        every: Duration,
        ttl: Duration,
    ) -> Self {
        let every = every.max(MIN_RENEW_INTERVAL);
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.renew_lease(&key, &token, ttl).await {
                            Ok(()) => debug!(key = %key, "lease renewed"),
                            Err(err) => {
                                warn!(key = %key, error = %err, "lease renewal failed; stopping renewal");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Cancel renewal and wait for the task to finish any in-flight renewal.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(err) = task.await {
            if err.is_panic() {
                warn!(error = %err, "lease renewal task panicked");
            }
        }
    }
}

impl Drop for RenewalSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::sleep;

    use super::*;
    use crate::dao::{lease_store::LeaseError, memory::MemoryLeaseStore};

    const TTL: Duration = Duration::from_secs(2);
    const EVERY: Duration = Duration::from_millis(500);

    async fn leased(store: &MemoryLeaseStore) -> LeaseToken {
        store.ensure_object("k").await.unwrap();
        store.acquire_lease("k", TTL).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_the_lease_alive_past_its_ttl() {
        let store = MemoryLeaseStore::new("locks");
        let token = leased(&store).await;
        let supervisor =
            RenewalSupervisor::spawn(Arc::new(store.clone()), "k".into(), token.clone(), EVERY, TTL);

        sleep(TTL * 3).await;
        assert!(matches!(
            store.acquire_lease("k", TTL).await,
            Err(LeaseError::Conflict { .. })
        ));

        supervisor.stop().await;
        store.release_lease("k", &token).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_supervisor_lets_the_lease_lapse() {
        let store = MemoryLeaseStore::new("locks");
        let token = leased(&store).await;
        let supervisor =
            RenewalSupervisor::spawn(Arc::new(store.clone()), "k".into(), token, EVERY, TTL);

        supervisor.stop().await;
        sleep(TTL + EVERY).await;

        store.acquire_lease("k", TTL).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_still_renews() {
        let store = MemoryLeaseStore::new("locks");
        let token = leased(&store).await;
        let supervisor = RenewalSupervisor::spawn(
            Arc::new(store.clone()),
            "k".into(),
            token,
            Duration::ZERO,
            TTL,
        );

        sleep(TTL * 2).await;
        assert!(matches!(
            store.acquire_lease("k", TTL).await,
            Err(LeaseError::Conflict { .. })
        ));
        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lost_lease_ends_renewal() {
        let store = MemoryLeaseStore::new("locks");
        let token = leased(&store).await;
        store.release_lease("k", &token).await.unwrap();

        let supervisor =
            RenewalSupervisor::spawn(Arc::new(store.clone()), "k".into(), token, EVERY, TTL);
        sleep(EVERY * 2).await;

        let task = supervisor.task.as_ref().unwrap();
        assert!(task.is_finished());
        supervisor.stop().await;
    }
}
