//! Game mutations run under the per-game lock.
//!
//! Every command opens the game with [`EntityClient::mutate`](crate::actor::EntityClient::mutate),
//! which persists and releases on success and releases without persisting on
//! rejection. The stored version is then announced to parked pollers.

use tracing::{debug, info};

use crate::{
    error::ServiceError,
    state::{
        SharedState,
        game::{GAME_PARTITION, Game, slugify},
    },
};

/// A single change requested on a game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameCommand {
    /// Create the game, or store it again when it already exists.
    Create,
    /// Let new players join.
    Open,
    /// Stop accepting players.
    Close,
    /// End the game for good.
    Finish,
    /// Seat a player.
    AddPlayer {
        /// Display name.
        name: String,
        /// Starting hand.
        cards: Vec<String>,
    },
    /// Replace the current round with a fresh one.
    NewRound {
        /// Prompt card of the round.
        prompt: String,
    },
    /// Archive the decided round, refill hands and start another.
    NextRound {
        /// Prompt card of the new round.
        prompt: String,
        /// Replacements for the cards played in the archived round.
        cards: Vec<String>,
    },
    /// Swap the prompt of the current round.
    NewPrompt {
        /// Replacement prompt.
        prompt: String,
    },
    /// Record the cards a player plays.
    Respond {
        /// Responding player.
        player_id: u32,
        /// Cards played, in order.
        cards: Vec<String>,
    },
    /// Withdraw a player's response.
    ResetResponse {
        /// Player taking the response back.
        player_id: u32,
    },
    /// Count one vote.
    Vote {
        /// Player voting.
        voter_id: u32,
        /// Player voted for.
        votee_id: u32,
    },
    /// Decide the round winner.
    Reveal,
    /// Replace a player's whole hand.
    ShufflePlayerCards {
        /// Owner of the hand.
        player_id: u32,
        /// New hand.
        cards: Vec<String>,
    },
    /// Replace one card in a player's hand.
    ReplacePlayerCard {
        /// Owner of the hand.
        player_id: u32,
        /// Position of the card.
        index: usize,
        /// New card text.
        card: String,
    },
}

impl GameCommand {
    /// Operation name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            GameCommand::Create => "create",
            GameCommand::Open => "open",
            GameCommand::Close => "close",
            GameCommand::Finish => "finish",
            GameCommand::AddPlayer { .. } => "add_player",
            GameCommand::NewRound { .. } => "new_round",
            GameCommand::NextRound { .. } => "next_round",
            GameCommand::NewPrompt { .. } => "new_prompt",
            GameCommand::Respond { .. } => "respond",
            GameCommand::ResetResponse { .. } => "reset_response",
            GameCommand::Vote { .. } => "vote",
            GameCommand::Reveal => "reveal",
            GameCommand::ShufflePlayerCards { .. } => "shuffle_player_cards",
            GameCommand::ReplacePlayerCard { .. } => "replace_player_card",
        }
    }

    /// Apply the command to a locked game. Any error abandons the change.
    fn apply(self, game: &mut Game, instance: &str) -> Result<(), ServiceError> {
        if !matches!(self, GameCommand::Create) && !game.is_created() {
            return Err(ServiceError::NotFound(format!("game `{instance}` not found")));
        }

        match self {
            GameCommand::Create => game.create(instance),
            GameCommand::Open => game.open(),
            GameCommand::Close => game.close(),
            GameCommand::Finish => game.finish(),
            GameCommand::AddPlayer { name, cards } => {
                if let Some(player_id) = game.add_player(&name, cards) {
                    debug!(player_id, "player joined");
                }
            }
            GameCommand::NewRound { prompt } => game.new_round(&prompt),
            GameCommand::NextRound { prompt, cards } => game.next_round(&prompt, cards),
            GameCommand::NewPrompt { prompt } => game.new_prompt(&prompt),
            GameCommand::Respond { player_id, cards } => game.respond(player_id, cards),
            GameCommand::ResetResponse { player_id } => game.reset_response(player_id),
            GameCommand::Vote { voter_id, votee_id } => game.vote(voter_id, votee_id),
            GameCommand::Reveal => game.reveal(),
            GameCommand::ShufflePlayerCards { player_id, cards } => {
                game.shuffle_player_cards(player_id, cards)?
            }
            GameCommand::ReplacePlayerCard {
                player_id,
                index,
                card,
            } => game.replace_player_card(player_id, index, card)?,
        }
        Ok(())
    }
}

/// Row key of the game addressed by `instance`.
pub fn game_key(instance: &str) -> Result<String, ServiceError> {
    let slug = slugify(instance);
    if slug.is_empty() {
        return Err(ServiceError::InvalidInput(format!(
            "`{instance}` does not name a game"
        )));
    }
    Ok(slug)
}

/// Lock the game, apply `command`, persist, release and notify pollers.
pub async fn execute(
    state: &SharedState,
    instance: &str,
    command: GameCommand,
) -> Result<Game, ServiceError> {
    let key = game_key(instance)?;
    let operation = command.name();
    let entities = state.entities().await?;

    let (game, ()) = entities
        .mutate(GAME_PARTITION, &key, |game: &mut Game| {
            command.apply(game, instance)
        })
        .await?;

    state.versions().notify(&key, game.version);
    info!(game = %key, operation, version = game.version, "game updated");
    Ok(game)
}

/// Read the stored game without locking it.
pub async fn read(state: &SharedState, instance: &str) -> Result<Game, ServiceError> {
    let key = game_key(instance)?;
    let entities = state.entities().await?;
    entities
        .get::<Game>(GAME_PARTITION, &key)
        .await?
        .filter(Game::is_created)
        .ok_or_else(|| ServiceError::NotFound(format!("game `{instance}` not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, dao::Stores, state::AppState};

    async fn ready_state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state.install_stores(Stores::in_memory("locks")).await;
        state
    }

    #[tokio::test]
    async fn each_command_persists_one_version() {
        let state = ready_state().await;

        let created = execute(&state, "Friday Night", GameCommand::Create).await.unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.url, "friday-night");

        let joined = execute(
            &state,
            "friday-night",
            GameCommand::AddPlayer {
                name: "ann".into(),
                cards: vec!["a".into()],
            },
        )
        .await
        .unwrap();
        assert_eq!(joined.version, 2);
        assert_eq!(joined.players.len(), 1);

        assert_eq!(state.versions().current_version("friday-night"), 2);
        assert_eq!(read(&state, "Friday Night").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn commands_on_a_missing_game_are_not_found_and_not_persisted() {
        let state = ready_state().await;

        let err = execute(&state, "ghost", GameCommand::Open).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(matches!(read(&state, "ghost").await, Err(ServiceError::NotFound(_))));
        assert_eq!(state.versions().current_version("ghost"), 0);

        // The rejected command released the lock.
        execute(&state, "ghost", GameCommand::Create).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_player_keeps_the_stored_version() {
        let state = ready_state().await;
        execute(&state, "demo", GameCommand::Create).await.unwrap();

        let err = execute(
            &state,
            "demo",
            GameCommand::ShufflePlayerCards {
                player_id: 4,
                cards: Vec::new(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(read(&state, "demo").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn unusable_names_are_rejected() {
        let state = ready_state().await;
        let err = execute(&state, "?!", GameCommand::Create).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn degraded_mode_refuses_commands() {
        let state = AppState::new(AppConfig::default());
        let err = execute(&state, "demo", GameCommand::Create).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }
}
