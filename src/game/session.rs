//! Session State Machine
//!
//! The aggregate root for one table: players in join order, the shared
//! deck and dealer, and the turn pointer. Transitions are pure functions
//! of the current state plus the acting player; all I/O lives in the
//! engine and gateway layers.
//!
//! Lifecycle: `Waiting -> Active -> Finished -> Waiting` (via reset).

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::deck::{Deck, DeckExhausted};
use super::player::{Dealer, Outcome, Player, PlayerId};

/// Seat capacity per session.
pub const MAX_PLAYERS: usize = 8;

/// Minimum ready players required to start a round.
pub const MIN_PLAYERS_TO_START: usize = 2;

/// Opaque unique session identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl GameId {
    /// Allocate a fresh identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Lobby: players join and ready up.
    Waiting,
    /// Round in progress.
    Active,
    /// Round settled; awaiting reset.
    Finished,
}

/// Whose move it is.
///
/// Serialized as the player's seat index, or the string `"dealer"` once
/// control passes to the house.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Turn {
    /// Index into the session's player list.
    Player(usize),
    /// Dealer sentinel: all seats have acted.
    Dealer,
}

impl Serialize for Turn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Turn::Player(index) => serializer.serialize_u64(*index as u64),
            Turn::Dealer => serializer.serialize_str("dealer"),
        }
    }
}

struct TurnVisitor;

impl Visitor<'_> for TurnVisitor {
    type Value = Turn;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a seat index or the string \"dealer\"")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Turn, E> {
        Ok(Turn::Player(value as usize))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Turn, E> {
        if value < 0 {
            return Err(E::custom("negative seat index"));
        }
        Ok(Turn::Player(value as usize))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Turn, E> {
        if value == "dealer" {
            Ok(Turn::Dealer)
        } else {
            Err(E::custom(format!("unknown turn sentinel: {value}")))
        }
    }
}

impl<'de> Deserialize<'de> for Turn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TurnVisitor)
    }
}

/// Rejected state transitions.
///
/// Every variant is a safe, side-effect-free refusal; the session is
/// unchanged (including `updated_at`) when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// Join attempted on a session that is not in the lobby.
    #[error("game is not joinable")]
    NotJoinable,
    /// Ready-up attempted after the round started.
    #[error("game is already in progress")]
    AlreadyStarted,
    /// The player id is already seated.
    #[error("player already joined")]
    DuplicatePlayer,
    /// All eight seats are taken.
    #[error("game is full")]
    GameFull,
    /// The player id is not part of this session.
    #[error("player is not part of the game")]
    PlayerNotFound,
    /// Hit/stand outside an active round.
    #[error("game is not in progress")]
    NotActive,
    /// Acting out of turn.
    #[error("it is not the player's turn")]
    NotPlayersTurn,
    /// The player already stood this round.
    #[error("player has already stood")]
    AlreadyStood,
    /// The player already busted this round.
    #[error("player has already busted")]
    AlreadyBusted,
    /// Reset attempted before the round settled.
    #[error("game is not finished")]
    NotFinished,
    /// The shared deck ran out of cards.
    #[error("no cards left in the deck")]
    DeckExhausted,
}

impl RuleError {
    /// Stable kebab-case reason code for failure events.
    pub fn reason(&self) -> &'static str {
        match self {
            RuleError::NotJoinable => "game-not-joinable",
            RuleError::AlreadyStarted => "game-already-in-progress",
            RuleError::DuplicatePlayer => "player-already-joined",
            RuleError::GameFull => "game-full",
            RuleError::PlayerNotFound => "player-not-found",
            RuleError::NotActive => "game-not-in-progress",
            RuleError::NotPlayersTurn => "not-players-turn",
            RuleError::AlreadyStood => "player-already-stood",
            RuleError::AlreadyBusted => "player-already-busted",
            RuleError::NotFinished => "game-not-finished",
            RuleError::DeckExhausted => "deck-exhausted",
        }
    }
}

impl From<DeckExhausted> for RuleError {
    fn from(_: DeckExhausted) -> Self {
        RuleError::DeckExhausted
    }
}

/// One game session: the only shared mutable record in the system.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    /// Unique identifier, assigned at creation.
    pub id: GameId,
    /// Lifecycle state.
    pub status: Status,
    /// Seated players; insertion order is turn order.
    pub players: Vec<Player>,
    /// Shared deck, dealt from while a round runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deck: Option<Deck>,
    /// House seat, present from deal to reset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dealer: Option<Dealer>,
    /// Turn pointer, present from deal to reset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<Turn>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Refreshed by every successful mutation.
    pub updated_at: DateTime<Utc>,
}

impl GameSession {
    /// A fresh, empty lobby.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: GameId::generate(),
            status: Status::Waiting,
            players: Vec::new(),
            deck: None,
            dealer: None,
            turn: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of seated players (including any who left mid-round).
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Whether the given id is seated.
    pub fn has_player(&self, id: &PlayerId) -> bool {
        self.players.iter().any(|p| &p.id == id)
    }

    fn player_index(&self, id: &PlayerId) -> Option<usize> {
        self.players.iter().position(|p| &p.id == id)
    }

    /// Whether enough players are seated and all of them are ready.
    pub fn all_ready(&self) -> bool {
        self.players.len() >= MIN_PLAYERS_TO_START && self.players.iter().all(|p| p.ready)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Seat a new player. Lobby only.
    pub fn add_player(&mut self, id: PlayerId) -> Result<(), RuleError> {
        if self.status != Status::Waiting {
            return Err(RuleError::NotJoinable);
        }
        if self.has_player(&id) {
            return Err(RuleError::DuplicatePlayer);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(RuleError::GameFull);
        }
        self.players.push(Player::new(id));
        self.touch();
        Ok(())
    }

    /// Mark a player ready. Starts the round once everyone is ready and
    /// at least [`MIN_PLAYERS_TO_START`] are seated.
    pub fn set_ready(&mut self, id: &PlayerId) -> Result<(), RuleError> {
        if self.status != Status::Waiting {
            return Err(RuleError::AlreadyStarted);
        }
        let player = self
            .players
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or(RuleError::PlayerNotFound)?;
        player.ready = true;
        if self.all_ready() {
            self.begin_round_with(Deck::shuffled())?;
        }
        self.touch();
        Ok(())
    }

    /// Deal from an explicit deck and open the round.
    ///
    /// Two interleaved deal rounds: every seat one card, then the dealer,
    /// twice. The first seat acts first.
    fn begin_round_with(&mut self, mut deck: Deck) -> Result<(), RuleError> {
        let mut dealer = Dealer::new();
        for player in &mut self.players {
            player.reset();
        }
        for _ in 0..2 {
            for player in &mut self.players {
                player.hand.push(deck.draw()?);
            }
            dealer.hand.push(deck.draw()?);
        }
        self.deck = Some(deck);
        self.dealer = Some(dealer);
        self.turn = Some(Turn::Player(0));
        self.status = Status::Active;
        Ok(())
    }

    fn acting_player(&self, id: &PlayerId) -> Result<usize, RuleError> {
        if self.status != Status::Active {
            return Err(RuleError::NotActive);
        }
        let index = self.player_index(id).ok_or(RuleError::PlayerNotFound)?;
        let player = &self.players[index];
        if player.is_busted() {
            return Err(RuleError::AlreadyBusted);
        }
        if player.stood {
            return Err(RuleError::AlreadyStood);
        }
        if self.turn != Some(Turn::Player(index)) {
            return Err(RuleError::NotPlayersTurn);
        }
        Ok(index)
    }

    /// Draw one card for the acting player. A bust ends their turn.
    pub fn hit(&mut self, id: &PlayerId) -> Result<(), RuleError> {
        let index = self.acting_player(id)?;
        let deck = self.deck.as_mut().ok_or(RuleError::NotActive)?;
        let card = deck.draw()?;
        self.players[index].hand.push(card);
        if self.players[index].is_busted() {
            self.advance_turn()?;
        }
        self.touch();
        Ok(())
    }

    /// End the acting player's turn voluntarily.
    pub fn stand(&mut self, id: &PlayerId) -> Result<(), RuleError> {
        let index = self.acting_player(id)?;
        self.players[index].stood = true;
        self.advance_turn()?;
        self.touch();
        Ok(())
    }

    /// Move the turn pointer to the next seat still in the round; past the
    /// last seat, hand control to the dealer and settle.
    fn advance_turn(&mut self) -> Result<(), RuleError> {
        let mut next = match self.turn {
            Some(Turn::Player(index)) => index + 1,
            _ => return Ok(()),
        };
        while next < self.players.len() && self.players[next].has_ended_round() {
            next += 1;
        }
        if next < self.players.len() {
            self.turn = Some(Turn::Player(next));
        } else {
            self.turn = Some(Turn::Dealer);
            self.dealer_play()?;
        }
        Ok(())
    }

    /// Dealer auto-play: draw to [`super::player::DEALER_STAND_SCORE`],
    /// then record every player's outcome and finish the round.
    fn dealer_play(&mut self) -> Result<(), RuleError> {
        {
            let deck = self.deck.as_mut().ok_or(RuleError::NotActive)?;
            let dealer = self.dealer.as_mut().ok_or(RuleError::NotActive)?;
            while dealer.must_draw() {
                dealer.hand.push(deck.draw()?);
            }
        }
        self.settle_outcomes();
        self.status = Status::Finished;
        Ok(())
    }

    fn settle_outcomes(&mut self) {
        let (dealer_score, dealer_busted) = match &self.dealer {
            Some(d) => (d.score(), d.is_busted()),
            None => return,
        };
        for player in &mut self.players {
            player.outcome = Some(if player.is_busted() {
                Outcome::Lost
            } else if dealer_busted || player.score() > dealer_score {
                Outcome::Won
            } else if player.score() < dealer_score {
                Outcome::Lost
            } else {
                Outcome::Push
            });
        }
    }

    /// Remove a player. In the lobby the seat is freed; mid-round the seat
    /// is retained, the player is flagged `left`, and their turn (if held)
    /// is forfeited as a stand.
    pub fn remove_player(&mut self, id: &PlayerId) -> Result<(), RuleError> {
        let index = self.player_index(id).ok_or(RuleError::PlayerNotFound)?;
        match self.status {
            Status::Waiting => {
                self.players.remove(index);
            }
            Status::Active => {
                let player = &mut self.players[index];
                player.left = true;
                if !player.has_ended_round() {
                    player.stood = true;
                }
                if self.turn == Some(Turn::Player(index)) {
                    self.advance_turn()?;
                }
            }
            Status::Finished => {
                self.players[index].left = true;
            }
        }
        self.touch();
        Ok(())
    }

    /// Return a finished session to the lobby: drop deck/dealer/turn,
    /// clear per-round player state, and evict seats that left.
    pub fn reset(&mut self) -> Result<(), RuleError> {
        if self.status != Status::Finished {
            return Err(RuleError::NotFinished);
        }
        self.deck = None;
        self.dealer = None;
        self.turn = None;
        self.players.retain(|p| !p.left);
        for player in &mut self.players {
            player.reset();
        }
        self.status = Status::Waiting;
        self.touch();
        Ok(())
    }
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}
