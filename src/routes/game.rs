use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    dto::{
        game::{
            AddPlayerRequest, GameView, NextRoundRequest, PlayerRequest, PromptRequest,
            ReplaceCardRequest, RespondRequest, ShuffleCardsRequest, VoteRequest,
        },
        poll::{PollQuery, PollResponse},
    },
    error::AppError,
    services::{
        game_service::{self, GameCommand},
        polling_service,
    },
    state::SharedState,
};

/// Routes addressing one game instance by name or slug.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/game/{instance}", post(create_game))
        .route("/game/{instance}/read", get(read_game))
        .route("/game/{instance}/poll", get(poll_game))
        .route("/game/{instance}/open", post(open_game))
        .route("/game/{instance}/close", post(close_game))
        .route("/game/{instance}/finish", post(finish_game))
        .route("/game/{instance}/player/add", post(add_player))
        .route("/game/{instance}/player/cards/shuffle", post(shuffle_player_cards))
        .route("/game/{instance}/player/card/replace", post(replace_player_card))
        .route("/game/{instance}/round/new", post(new_round))
        .route("/game/{instance}/round/next", post(next_round))
        .route("/game/{instance}/round/prompt/new", post(new_prompt))
        .route("/game/{instance}/round/respond", post(respond))
        .route("/game/{instance}/round/respond/reset", post(reset_response))
        .route("/game/{instance}/round/vote", post(vote))
        .route("/game/{instance}/round/reveal", post(reveal))
}

async fn execute(
    state: &SharedState,
    instance: &str,
    command: GameCommand,
) -> Result<Json<GameView>, AppError> {
    let game = game_service::execute(state, instance, command).await?;
    Ok(Json(game.into()))
}

/// Create the game named `instance`. Creating an existing game keeps its data.
#[utoipa::path(
    post,
    path = "/game/{instance}",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    responses(
        (status = 200, description = "Game created", body = GameView),
        (status = 409, description = "Game is being modified elsewhere"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_game(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
) -> Result<Json<GameView>, AppError> {
    execute(&state, &instance, GameCommand::Create).await
}

/// Read the stored game without taking its lock.
#[utoipa::path(
    get,
    path = "/game/{instance}/read",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    responses(
        (status = 200, description = "Current game", body = GameView),
        (status = 404, description = "Game does not exist")
    )
)]
pub async fn read_game(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
) -> Result<Json<GameView>, AppError> {
    let game = game_service::read(&state, &instance).await?;
    Ok(Json(game.into()))
}

/// Wait for the game to move past the client's version.
#[utoipa::path(
    get,
    path = "/game/{instance}/poll",
    tag = "poll",
    params(("instance" = String, Path, description = "Game name or slug"), PollQuery),
    responses((status = 200, description = "Latest known version", body = PollResponse))
)]
pub async fn poll_game(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollResponse>, AppError> {
    // Dropping the handler future (client gone) cancels the wait.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let response =
        polling_service::poll(&state, &instance, query.known_version(), &cancel).await?;
    Ok(Json(response))
}

/// Let new players join.
#[utoipa::path(
    post,
    path = "/game/{instance}/open",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    responses((status = 200, description = "Game opened to new players", body = GameView))
)]
pub async fn open_game(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
) -> Result<Json<GameView>, AppError> {
    execute(&state, &instance, GameCommand::Open).await
}

/// Stop accepting players.
#[utoipa::path(
    post,
    path = "/game/{instance}/close",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    responses((status = 200, description = "Game closed to new players", body = GameView))
)]
pub async fn close_game(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
) -> Result<Json<GameView>, AppError> {
    execute(&state, &instance, GameCommand::Close).await
}

/// End the game.
#[utoipa::path(
    post,
    path = "/game/{instance}/finish",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    responses((status = 200, description = "Game over", body = GameView))
)]
pub async fn finish_game(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
) -> Result<Json<GameView>, AppError> {
    execute(&state, &instance, GameCommand::Finish).await
}

/// Seat a player; ignored while the game is closed or over.
#[utoipa::path(
    post,
    path = "/game/{instance}/player/add",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    request_body = AddPlayerRequest,
    responses(
        (status = 200, description = "Player seated", body = GameView),
        (status = 400, description = "Invalid player")
    )
)]
pub async fn add_player(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Json(payload): Json<AddPlayerRequest>,
) -> Result<Json<GameView>, AppError> {
    payload.validate()?;
    let command = GameCommand::AddPlayer {
        name: payload.name,
        cards: payload.cards,
    };
    execute(&state, &instance, command).await
}

/// Replace a player's whole hand.
#[utoipa::path(
    post,
    path = "/game/{instance}/player/cards/shuffle",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    request_body = ShuffleCardsRequest,
    responses(
        (status = 200, description = "Hand replaced", body = GameView),
        (status = 404, description = "Unknown player")
    )
)]
pub async fn shuffle_player_cards(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Json(payload): Json<ShuffleCardsRequest>,
) -> Result<Json<GameView>, AppError> {
    payload.validate()?;
    let command = GameCommand::ShufflePlayerCards {
        player_id: payload.player_id,
        cards: payload.cards,
    };
    execute(&state, &instance, command).await
}

/// Replace one card of a player's hand.
#[utoipa::path(
    post,
    path = "/game/{instance}/player/card/replace",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    request_body = ReplaceCardRequest,
    responses(
        (status = 200, description = "Card replaced", body = GameView),
        (status = 404, description = "Unknown player")
    )
)]
pub async fn replace_player_card(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Json(payload): Json<ReplaceCardRequest>,
) -> Result<Json<GameView>, AppError> {
    payload.validate()?;
    let command = GameCommand::ReplacePlayerCard {
        player_id: payload.player_id,
        index: payload.card_index,
        card: payload.card,
    };
    execute(&state, &instance, command).await
}

/// Start a fresh round, discarding the current one.
#[utoipa::path(
    post,
    path = "/game/{instance}/round/new",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    request_body = PromptRequest,
    responses((status = 200, description = "Round started", body = GameView))
)]
pub async fn new_round(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Json(payload): Json<PromptRequest>,
) -> Result<Json<GameView>, AppError> {
    payload.validate()?;
    let command = GameCommand::NewRound {
        prompt: payload.prompt,
    };
    execute(&state, &instance, command).await
}

/// Archive the decided round and start another; nothing happens without a winner.
#[utoipa::path(
    post,
    path = "/game/{instance}/round/next",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    request_body = NextRoundRequest,
    responses((status = 200, description = "Next round started", body = GameView))
)]
pub async fn next_round(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Json(payload): Json<NextRoundRequest>,
) -> Result<Json<GameView>, AppError> {
    payload.validate()?;
    let command = GameCommand::NextRound {
        prompt: payload.prompt,
        cards: payload.cards,
    };
    execute(&state, &instance, command).await
}

/// Swap the prompt of the current round.
#[utoipa::path(
    post,
    path = "/game/{instance}/round/prompt/new",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    request_body = PromptRequest,
    responses((status = 200, description = "Prompt replaced", body = GameView))
)]
pub async fn new_prompt(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Json(payload): Json<PromptRequest>,
) -> Result<Json<GameView>, AppError> {
    payload.validate()?;
    let command = GameCommand::NewPrompt {
        prompt: payload.prompt,
    };
    execute(&state, &instance, command).await
}

/// Record the cards a player plays this round.
#[utoipa::path(
    post,
    path = "/game/{instance}/round/respond",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    request_body = RespondRequest,
    responses((status = 200, description = "Response recorded", body = GameView))
)]
pub async fn respond(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<GameView>, AppError> {
    payload.validate()?;
    let command = GameCommand::Respond {
        player_id: payload.player_id,
        cards: payload.cards,
    };
    execute(&state, &instance, command).await
}

/// Withdraw a player's response.
#[utoipa::path(
    post,
    path = "/game/{instance}/round/respond/reset",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    request_body = PlayerRequest,
    responses((status = 200, description = "Response withdrawn", body = GameView))
)]
pub async fn reset_response(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Json(payload): Json<PlayerRequest>,
) -> Result<Json<GameView>, AppError> {
    payload.validate()?;
    let command = GameCommand::ResetResponse {
        player_id: payload.player_id,
    };
    execute(&state, &instance, command).await
}

/// Vote for another player's response; one vote per player.
#[utoipa::path(
    post,
    path = "/game/{instance}/round/vote",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    request_body = VoteRequest,
    responses((status = 200, description = "Vote counted", body = GameView))
)]
pub async fn vote(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<GameView>, AppError> {
    payload.validate()?;
    let command = GameCommand::Vote {
        voter_id: payload.voter_id,
        votee_id: payload.votee_id,
    };
    execute(&state, &instance, command).await
}

/// Pick the round winner from the votes.
#[utoipa::path(
    post,
    path = "/game/{instance}/round/reveal",
    tag = "game",
    params(("instance" = String, Path, description = "Game name or slug")),
    responses((status = 200, description = "Round winner revealed", body = GameView))
)]
pub async fn reveal(
    State(state): State<SharedState>,
    Path(instance): Path<String>,
) -> Result<Json<GameView>, AppError> {
    execute(&state, &instance, GameCommand::Reveal).await
}
