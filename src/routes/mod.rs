use axum::Router;

use crate::state::SharedState;

/// Swagger UI and OpenAPI JSON.
pub mod docs;
/// Game instance routes.
pub mod game;
/// Health check route.
pub mod health;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(game::router())
        .merge(docs::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use tokio::time::{Instant, sleep};
    use tower::ServiceExt;

    use super::*;
    use crate::{config::AppConfig, dao::Stores, state::AppState};

    async fn ready_state() -> SharedState {
        let state = AppState::new(AppConfig {
            poll_timeout: Duration::from_secs(5),
            ..AppConfig::default()
        });
        state.install_stores(Stores::in_memory("locks")).await;
        state
    }

    async fn send(
        state: &SharedState,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn healthcheck_reports_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let (status, body) = send(&state, Method::GET, "/healthcheck", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "degraded"}));

        let (status, _) = send(&state, Method::POST, "/game/demo", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.install_stores(Stores::in_memory("locks")).await;
        let (_, body) = send(&state, Method::GET, "/healthcheck", None).await;
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn a_full_round_over_http() {
        let state = ready_state().await;

        let (status, body) = send(&state, Method::POST, "/game/Friday%20Night", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "friday-night");
        assert_eq!(body["version"], 1);

        for (name, card) in [("ann", "a1"), ("bob", "b1")] {
            let (status, _) = send(
                &state,
                Method::POST,
                "/game/friday-night/player/add",
                Some(json!({"name": name, "cards": [card, "spare"]})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let steps = [
            ("/game/friday-night/round/new", json!({"prompt": "Why?"})),
            ("/game/friday-night/round/respond", json!({"playerId": 1, "cards": ["a1"]})),
            ("/game/friday-night/round/respond", json!({"playerId": 2, "cards": ["b1"]})),
            ("/game/friday-night/round/vote", json!({"voterId": 2, "voteeId": 1})),
        ];
        for (uri, payload) in steps {
            let (status, _) = send(&state, Method::POST, uri, Some(payload)).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
        }
        let (_, body) = send(&state, Method::POST, "/game/friday-night/round/reveal", None).await;
        assert_eq!(body["currentRound"]["wonBy"], 1);

        let (_, body) = send(
            &state,
            Method::POST,
            "/game/friday-night/round/next",
            Some(json!({"prompt": "How?", "cards": ["n1", "n2"]})),
        )
        .await;
        assert_eq!(body["score"], json!({"1": 1}));
        assert_eq!(body["players"][0]["cards"], json!(["n1", "spare"]));
        assert_eq!(body["version"], 9);

        let (status, body) = send(&state, Method::GET, "/game/friday-night/read", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currentRound"]["prompt"], "How?");
    }

    #[tokio::test]
    async fn client_errors_map_to_statuses() {
        let state = ready_state().await;

        let (status, _) = send(&state, Method::GET, "/game/ghost/read", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&state, Method::POST, "/game/ghost/open", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&state, Method::POST, "/game/demo", None).await;
        let (status, body) = send(
            &state,
            Method::POST,
            "/game/demo/player/add",
            Some(json!({"name": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("validation failed"));

        let (status, _) = send(
            &state,
            Method::POST,
            "/game/demo/player/card/replace",
            Some(json!({"playerId": 9, "cardIndex": 0, "card": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn held_game_answers_conflict() {
        let state = ready_state().await;
        send(&state, Method::POST, "/game/demo", None).await;

        let held = state
            .entities()
            .await
            .unwrap()
            .get_locked::<crate::state::game::Game>("game", "demo")
            .await
            .unwrap();

        let (status, _) = send(&state, Method::POST, "/game/demo/close", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        held.abandon().await.unwrap();
        let (status, _) = send(&state, Method::POST, "/game/demo/close", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_returns_as_soon_as_the_game_changes() {
        let state = ready_state().await;
        let writer = state.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            send(&writer, Method::POST, "/game/demo", None).await;
        });

        let started = Instant::now();
        let (status, body) = send(&state, Method::GET, "/game/demo/poll?version=0", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"version": 1, "hasUpdate": true}));
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1_100),
            "elapsed {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poll_without_changes_times_out() {
        let state = ready_state().await;
        send(&state, Method::POST, "/game/demo", None).await;

        let started = Instant::now();
        let (_, body) = send(&state, Method::GET, "/game/demo/poll?version=1", None).await;
        assert_eq!(body, json!({"version": 1, "hasUpdate": false}));
        assert!(started.elapsed() >= Duration::from_secs(5));

        let (_, body) = send(&state, Method::GET, "/game/demo/poll?version=nope", None).await;
        assert_eq!(body, json!({"version": 1, "hasUpdate": true}));
    }
}
