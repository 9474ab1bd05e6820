//! The game aggregate persisted under its lock, plus its mutations.
//!
//! Mutations only touch in-memory state. Versioning is left to the flush
//! that persists them.

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dao::entity::TableEntity;

/// Partition every game row lives in.
pub const GAME_PARTITION: &str = "game";
/// Table holding game rows.
pub const GAME_TABLE: &str = "games";
/// Cards dealt to each player.
pub const DEFAULT_CARD_COUNT: u32 = 7;
const SLUG_MAX_LEN: usize = 45;
const CODE_UPPER_BOUND: u32 = 1_000_000;

/// Rule violations that reject a mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameRuleError {
    /// No seated player has this id.
    #[error("player {player_id} is not part of this game")]
    UnknownPlayer { player_id: u32 },
}

/// A participant and the cards in their hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Sequential id starting at 1.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Cards in hand.
    #[serde(default)]
    pub cards: Vec<String>,
}

/// The cards one player played in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Player who played the cards.
    pub player_id: u32,
    /// Played cards, in order.
    #[serde(default)]
    pub responses: Vec<String>,
}

/// One prompt with its responses and votes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    /// Prompt card the players answer.
    pub prompt: String,
    /// At most one response per player.
    #[serde(default)]
    pub responses: Vec<Response>,
    /// Players who already voted.
    #[serde(default)]
    pub voted: Vec<u32>,
    /// One entry per vote, naming the player voted for.
    #[serde(default)]
    pub votes: Vec<u32>,
    /// Winning player id, 0 while undecided.
    #[serde(default)]
    pub won_by: u32,
}

impl Round {
    /// Empty round for `prompt`.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Whether `reveal` picked a winner.
    pub fn has_winner(&self) -> bool {
        self.won_by > 0
    }

    /// Record `player_id`'s cards, replacing an earlier response.
    pub fn respond(&mut self, player_id: u32, cards: Vec<String>) {
        self.reset_response(player_id);
        self.responses.push(Response {
            player_id,
            responses: cards,
        });
    }

    /// Drop `player_id`'s response, if any.
    pub fn reset_response(&mut self, player_id: u32) {
        self.responses
            .retain(|response| response.player_id != player_id);
    }

    /// Count one vote per voter, only for players who responded.
    pub fn vote(&mut self, voter_id: u32, votee_id: u32) {
        let votee_responded = self
            .responses
            .iter()
            .any(|response| response.player_id == votee_id);
        if !votee_responded || self.voted.contains(&voter_id) {
            return;
        }
        self.voted.push(voter_id);
        self.votes.push(votee_id);
    }

    /// Pick the most voted player. Ties go to the player voted for first.
    pub fn reveal(&mut self) {
        let mut tally: IndexMap<u32, usize> = IndexMap::new();
        for votee in &self.votes {
            *tally.entry(*votee).or_default() += 1;
        }

        let mut winner: Option<(u32, usize)> = None;
        for (player_id, count) in tally {
            if winner.is_none_or(|(_, best)| count > best) {
                winner = Some((player_id, count));
            }
        }
        if let Some((player_id, _)) = winner {
            self.won_by = player_id;
        }
    }
}

/// One game instance, addressed by the slug of its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    /// Always [`GAME_PARTITION`].
    pub partition_key: String,
    /// Slug of the game name.
    pub row_key: String,
    /// Slug set on creation; empty until then.
    #[serde(default)]
    pub url: String,
    /// Name as first given on creation.
    #[serde(default)]
    pub name: String,
    /// Random join code.
    #[serde(default)]
    pub code: String,
    /// Hand size dealt to players.
    #[serde(default = "default_card_count")]
    pub card_count: u32,
    /// Bumped once per stored change.
    #[serde(default)]
    pub version: u64,
    /// Seated players in join order.
    #[serde(default)]
    pub players: Vec<Player>,
    /// Round in play.
    #[serde(default)]
    pub current_round: Option<Round>,
    /// Archived rounds, oldest first.
    #[serde(default)]
    pub previous_rounds: Vec<Round>,
    /// Whether new players may join.
    #[serde(default = "default_true")]
    pub is_open: bool,
    /// Set once the game is finished.
    #[serde(default)]
    pub is_over: bool,
}

fn default_card_count() -> u32 {
    DEFAULT_CARD_COUNT
}

fn default_true() -> bool {
    true
}

impl TableEntity for Game {
    const TABLE: &'static str = GAME_TABLE;
    const STRUCTURED_FIELDS: &'static [&'static str] =
        &["players", "currentRound", "previousRounds"];

    fn with_keys(partition_key: String, row_key: String) -> Self {
        Self {
            partition_key,
            row_key,
            url: String::new(),
            name: String::new(),
            code: String::new(),
            card_count: DEFAULT_CARD_COUNT,
            version: 0,
            players: Vec::new(),
            current_round: None,
            previous_rounds: Vec::new(),
            is_open: true,
            is_over: false,
        }
    }

    fn keys(&self) -> (&str, &str) {
        (&self.partition_key, &self.row_key)
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Game {
    /// Whether `create` already ran for this game.
    pub fn is_created(&self) -> bool {
        !self.url.is_empty()
    }

    /// Rounds won per player id, in order of first win.
    pub fn score(&self) -> IndexMap<u32, u32> {
        let mut score = IndexMap::new();
        for round in self.previous_rounds.iter().filter(|round| round.has_winner()) {
            *score.entry(round.won_by).or_default() += 1;
        }
        score
    }

    /// Name the game and draw its join code. A created game is left untouched.
    pub fn create(&mut self, name: &str) {
        if self.is_created() {
            return;
        }
        self.url = slugify(name);
        self.name = name.to_owned();
        self.code = rand::rng().random_range(0..CODE_UPPER_BOUND).to_string();
    }

    /// Let new players join.
    pub fn open(&mut self) {
        self.is_open = true;
    }

    /// Stop accepting players.
    pub fn close(&mut self) {
        self.is_open = false;
    }

    /// Mark the game over.
    pub fn finish(&mut self) {
        self.is_over = true;
    }

    /// Seat a new player with sequential id. Ignored once closed or over.
    pub fn add_player(&mut self, name: &str, cards: Vec<String>) -> Option<u32> {
        if !self.is_open || self.is_over {
            return None;
        }
        let id = self.players.len() as u32 + 1;
        self.players.push(Player {
            id,
            name: name.to_owned(),
            cards,
        });
        Some(id)
    }

    /// Replace the current round with a fresh one for `prompt`.
    pub fn new_round(&mut self, prompt: &str) {
        self.current_round = Some(Round::new(prompt));
    }

    /// Archive a decided round and start the next one.
    ///
    /// Cards played in the archived round are swapped for `replacements`.
    /// Nothing happens while the current round has no winner.
    pub fn next_round(&mut self, prompt: &str, replacements: Vec<String>) {
        match self.current_round.take() {
            Some(round) if round.has_winner() => self.previous_rounds.push(round),
            other => {
                self.current_round = other;
                return;
            }
        }
        self.new_round(prompt);
        self.replace_played_cards(replacements);
    }

    /// Swap each card played in the last archived round for a fresh one.
    ///
    /// Skipped entirely when fewer replacements than played cards are given.
    pub fn replace_played_cards(&mut self, replacements: Vec<String>) {
        let Some(last) = self.previous_rounds.last() else {
            return;
        };
        let needed: usize = last.responses.iter().map(|r| r.responses.len()).sum();
        if replacements.len() < needed {
            return;
        }

        let mut fresh = replacements.into_iter();
        for response in &last.responses {
            let Some(player) = self
                .players
                .iter_mut()
                .find(|player| player.id == response.player_id)
            else {
                continue;
            };
            for played in &response.responses {
                let slot = player
                    .cards
                    .iter_mut()
                    .find(|card| card.as_str() == played.as_str());
                if let Some(slot) = slot {
                    if let Some(card) = fresh.next() {
                        *slot = card;
                    }
                }
            }
        }
    }

    /// Swap the prompt of the current round.
    pub fn new_prompt(&mut self, prompt: &str) {
        if let Some(round) = self.current_round.as_mut() {
            round.prompt = prompt.to_owned();
        }
    }

    /// Forwarded to the current round, if any.
    pub fn respond(&mut self, player_id: u32, cards: Vec<String>) {
        if let Some(round) = self.current_round.as_mut() {
            round.respond(player_id, cards);
        }
    }

    /// Forwarded to the current round, if any.
    pub fn reset_response(&mut self, player_id: u32) {
        if let Some(round) = self.current_round.as_mut() {
            round.reset_response(player_id);
        }
    }

    /// Forwarded to the current round, if any.
    pub fn vote(&mut self, voter_id: u32, votee_id: u32) {
        if let Some(round) = self.current_round.as_mut() {
            round.vote(voter_id, votee_id);
        }
    }

    /// Forwarded to the current round, if any.
    pub fn reveal(&mut self) {
        if let Some(round) = self.current_round.as_mut() {
            round.reveal();
        }
    }

    /// Replace a player's whole hand.
    pub fn shuffle_player_cards(
        &mut self,
        player_id: u32,
        cards: Vec<String>,
    ) -> Result<(), GameRuleError> {
        self.player_mut(player_id)?.cards = cards;
        Ok(())
    }

    /// Replace the card at `index` in a player's hand; out of range is ignored.
    pub fn replace_player_card(
        &mut self,
        player_id: u32,
        index: usize,
        card: String,
    ) -> Result<(), GameRuleError> {
        if let Some(slot) = self.player_mut(player_id)?.cards.get_mut(index) {
            *slot = card;
        }
        Ok(())
    }

    fn player_mut(&mut self, player_id: u32) -> Result<&mut Player, GameRuleError> {
        self.players
            .iter_mut()
            .find(|player| player.id == player_id)
            .ok_or(GameRuleError::UnknownPlayer { player_id })
    }
}

/// URL-safe identifier derived from a display name.
///
/// Lowercases, folds common Latin accents, keeps `[a-z0-9]`, spaces and
/// dashes, collapses whitespace and caps the result at 45 characters.
pub fn slugify(name: &str) -> String {
    let kept: String = name
        .to_lowercase()
        .chars()
        .map(fold_accent)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || c.is_whitespace())
        .collect();

    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(SLUG_MAX_LEN).collect();
    truncated.trim().replace(' ', "-")
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}
