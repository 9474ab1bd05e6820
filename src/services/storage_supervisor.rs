use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{Stores, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect the storage backend and keep the shared state in degraded mode while it is unavailable.
///
/// Once connected the stores are health checked every few seconds. A failed
/// check flips degraded mode and tries to revive the existing connection; when
/// that fails too the stores are dropped and a fresh connection is made.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Stores, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        let stores = match connect().await {
            Ok(stores) => stores,
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                continue;
            }
        };

        state.install_stores(stores.clone()).await;
        info!("storage connection established; leaving degraded mode");
        delay = INITIAL_DELAY;

        watch_health(&state, &stores).await;

        state.clear_stores().await;
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Health check `stores` until they cannot be revived.
async fn watch_health(state: &SharedState, stores: &Stores) {
    loop {
        match stores.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                if !reconnect(state, stores).await {
                    warn!("exhausted storage reconnect attempts; staying in degraded mode");
                    return;
                }
                state.update_degraded(false);
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn reconnect(state: &SharedState, stores: &Stores) -> bool {
    let mut delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match stores.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                return true;
            }
            Err(err) if attempt == 0 => {
                warn!(attempt, error = %err, "storage reconnect first attempt failed; entering degraded mode");
                state.update_degraded(true);
            }
            Err(err) => {
                warn!(attempt, error = %err, "storage reconnect attempt failed");
            }
        }
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::{config::AppConfig, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_backend_connects() {
        let state = AppState::new(AppConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let supervisor = tokio::spawn(run(state.clone(), move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(StorageError::unavailable(
                        "backend down".into(),
                        std::io::Error::other("refused"),
                    ))
                } else {
                    Ok(Stores::in_memory("locks"))
                }
            }
        }));

        let mut degraded = state.degraded_watcher();
        degraded.wait_for(|value| !*value).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(state.entities().await.is_ok());
        supervisor.abort();
    }
}
