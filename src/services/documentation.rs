use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Cards Party Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::game::create_game,
        crate::routes::game::read_game,
        crate::routes::game::poll_game,
        crate::routes::game::open_game,
        crate::routes::game::close_game,
        crate::routes::game::finish_game,
        crate::routes::game::add_player,
        crate::routes::game::shuffle_player_cards,
        crate::routes::game::replace_player_card,
        crate::routes::game::new_round,
        crate::routes::game::next_round,
        crate::routes::game::new_prompt,
        crate::routes::game::respond,
        crate::routes::game::reset_response,
        crate::routes::game::vote,
        crate::routes::game::reveal,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::poll::PollResponse,
            crate::dto::game::GameView,
            crate::dto::game::PlayerView,
            crate::dto::game::RoundView,
            crate::dto::game::ResponseView,
            crate::dto::game::AddPlayerRequest,
            crate::dto::game::PromptRequest,
            crate::dto::game::NextRoundRequest,
            crate::dto::game::RespondRequest,
            crate::dto::game::PlayerRequest,
            crate::dto::game::VoteRequest,
            crate::dto::game::ShuffleCardsRequest,
            crate::dto::game::ReplaceCardRequest,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "game", description = "Game lifecycle and rounds"),
        (name = "poll", description = "Long-poll for game changes"),
    )
)]
/// OpenAPI description of every route and schema.
pub struct ApiDoc;
