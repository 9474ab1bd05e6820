use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    dto::poll::PollResponse,
    error::ServiceError,
    services::game_service::game_key,
    state::{
        SharedState,
        game::{GAME_PARTITION, Game},
    },
};

/// Park until the game moves past `known`, the poll timeout elapses or `cancel` fires.
///
/// A wait that sees no local notification falls back to the stored version,
/// which catches writes made by other processes.
pub async fn poll(
    state: &SharedState,
    instance: &str,
    known: u64,
    cancel: &CancellationToken,
) -> Result<PollResponse, ServiceError> {
    let key = game_key(instance)?;
    let mut latest = state
        .versions()
        .wait_for_update(&key, known, state.config().poll_timeout, cancel)
        .await;

    if latest <= known && !cancel.is_cancelled() {
        latest = latest.max(stored_version(state, &key).await);
    }

    debug!(game = %key, known, latest, "poll finished");
    Ok(PollResponse::new(known, latest))
}

async fn stored_version(state: &SharedState, key: &str) -> u64 {
    let entities = match state.entities().await {
        Ok(entities) => entities,
        Err(_) => return 0,
    };
    match entities.get::<Game>(GAME_PARTITION, key).await {
        Ok(game) => game.map(|game| game.version).unwrap_or(0),
        Err(err) => {
            warn!(game = %key, error = %err, "failed to read stored version after poll");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{Instant, sleep};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::Stores,
        services::game_service::{GameCommand, execute},
        state::AppState,
    };

    async fn ready_state(poll_timeout: Duration) -> SharedState {
        let state = AppState::new(AppConfig {
            poll_timeout,
            ..AppConfig::default()
        });
        state.install_stores(Stores::in_memory("locks")).await;
        state
    }

    #[tokio::test(start_paused = true)]
    async fn flush_wakes_a_parked_poll() {
        let state = ready_state(Duration::from_secs(5)).await;
        let writer = state.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            execute(&writer, "demo", GameCommand::Create).await.unwrap();
        });

        let started = Instant::now();
        let response = poll(&state, "demo", 0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, PollResponse::new(0, 1));
        assert!(response.has_update);
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1_100),
            "elapsed {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_game_times_out_without_update() {
        let state = ready_state(Duration::from_secs(2)).await;
        let response = poll(&state, "demo", 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response, PollResponse::new(3, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn stored_version_covers_writes_not_seen_locally() {
        let state = ready_state(Duration::from_secs(1)).await;
        let stores = state.stores().await.unwrap();

        // A second process sharing the same backend.
        let other = AppState::new(AppConfig::default());
        other.install_stores(stores).await;
        execute(&other, "demo", GameCommand::Create).await.unwrap();

        let response = poll(&state, "demo", 0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response, PollResponse::new(0, 1));
    }
}
