use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::validation::{MAX_CARD_LEN, validate_cards},
    state::game::{Game, Player, Response, Round},
};

/// Payload seating a new player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddPlayerRequest {
    /// Display name, also shown to the other players.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Starting hand.
    #[serde(default)]
    #[validate(custom(function = "validate_cards"))]
    pub cards: Vec<String>,
}

/// Payload carrying a round prompt.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Prompt card the players answer.
    #[validate(length(min = 1, max = MAX_CARD_LEN))]
    pub prompt: String,
}

/// Payload opening the next round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NextRoundRequest {
    /// Prompt of the new round.
    #[validate(length(min = 1, max = MAX_CARD_LEN))]
    pub prompt: String,
    /// Fresh cards replacing the ones played in the finished round.
    #[serde(default)]
    #[validate(custom(function = "validate_cards"))]
    pub cards: Vec<String>,
}

/// Payload carrying the cards a player plays this round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    #[validate(range(min = 1))]
    pub player_id: u32,
    #[validate(length(min = 1), custom(function = "validate_cards"))]
    pub cards: Vec<String>,
}

/// Payload naming a single player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRequest {
    #[validate(range(min = 1))]
    pub player_id: u32,
}

/// Payload casting one vote.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    /// Player casting the vote.
    #[validate(range(min = 1))]
    pub voter_id: u32,
    /// Player whose response gets the vote.
    #[validate(range(min = 1))]
    pub votee_id: u32,
}

/// Payload replacing a player's whole hand.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleCardsRequest {
    #[validate(range(min = 1))]
    pub player_id: u32,
    #[validate(custom(function = "validate_cards"))]
    pub cards: Vec<String>,
}

/// Payload replacing one card of a player's hand.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceCardRequest {
    #[validate(range(min = 1))]
    pub player_id: u32,
    /// Zero-based position in the hand.
    pub card_index: usize,
    #[validate(length(min = 1, max = MAX_CARD_LEN))]
    pub card: String,
}

/// Public projection of a game returned by every game route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    /// Slug addressing the game.
    pub url: String,
    pub name: String,
    /// Join code handed out to players.
    pub code: String,
    pub card_count: u32,
    /// Bumped on every stored change.
    pub version: u64,
    pub is_open: bool,
    pub is_over: bool,
    pub players: Vec<PlayerView>,
    pub current_round: Option<RoundView>,
    pub previous_rounds: Vec<RoundView>,
    /// Rounds won, keyed by player id.
    #[schema(value_type = Object)]
    pub score: IndexMap<u32, u32>,
}

/// A seated player and their hand.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: u32,
    pub name: String,
    pub cards: Vec<String>,
}

/// One round as shown to clients.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub prompt: String,
    pub responses: Vec<ResponseView>,
    /// Players who already voted, in order.
    pub voted: Vec<u32>,
    /// Vote recipients, parallel to `voted`.
    pub votes: Vec<u32>,
    /// 0 until revealed.
    pub won_by: u32,
}

/// Cards one player played in a round.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseView {
    pub player_id: u32,
    pub responses: Vec<String>,
}

impl From<Game> for GameView {
    fn from(game: Game) -> Self {
        let score = game.score();
        Self {
            url: game.url,
            name: game.name,
            code: game.code,
            card_count: game.card_count,
            version: game.version,
            is_open: game.is_open,
            is_over: game.is_over,
            players: game.players.into_iter().map(Into::into).collect(),
            current_round: game.current_round.map(Into::into),
            previous_rounds: game.previous_rounds.into_iter().map(Into::into).collect(),
            score,
        }
    }
}

impl From<Player> for PlayerView {
    fn from(player: Player) -> Self {
        Self {
            id: player.id,
            name: player.name,
            cards: player.cards,
        }
    }
}

impl From<Round> for RoundView {
    fn from(round: Round) -> Self {
        Self {
            prompt: round.prompt,
            responses: round.responses.into_iter().map(Into::into).collect(),
            voted: round.voted,
            votes: round.votes,
            won_by: round.won_by,
        }
    }
}

impl From<Response> for ResponseView {
    fn from(response: Response) -> Self {
        Self {
            player_id: response.player_id,
            responses: response.responses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dao::entity::TableEntity, state::game::GAME_PARTITION};

    #[test]
    fn requests_are_validated() {
        let blank_name = AddPlayerRequest {
            name: String::new(),
            cards: Vec::new(),
        };
        assert!(blank_name.validate().is_err());

        let no_cards = RespondRequest {
            player_id: 1,
            cards: Vec::new(),
        };
        assert!(no_cards.validate().is_err());

        let zero_voter = VoteRequest {
            voter_id: 0,
            votee_id: 1,
        };
        assert!(zero_voter.validate().is_err());

        let fine = ReplaceCardRequest {
            player_id: 1,
            card_index: 0,
            card: "a llama".into(),
        };
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn view_carries_the_score() {
        let mut game = Game::with_keys(GAME_PARTITION.into(), "demo".into());
        game.create("demo");
        game.add_player("ann", vec!["a".into()]);
        game.new_round("Why?");
        game.respond(1, vec!["a".into()]);
        game.vote(2, 1);
        game.reveal();
        game.next_round("Again?", vec!["b".into()]);

        let body = serde_json::to_value(GameView::from(game)).unwrap();
        assert_eq!(body["score"], serde_json::json!({"1": 1}));
        assert_eq!(body["currentRound"]["prompt"], "Again?");
        assert_eq!(body["players"][0]["cards"], serde_json::json!(["b"]));
        assert_eq!(body["cardCount"], 7);
    }
}
