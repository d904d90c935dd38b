//! Player and Dealer Seats
//!
//! A player occupies one seat in join order. The dealer holds a hand and
//! scores like a player but never readies up and has no seat in the turn
//! order.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::card::{is_busted, score, Card};

/// Dealer draws until reaching this score.
pub const DEALER_STAND_SCORE: u32 = 17;

/// Opaque external player identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Round result for one player, recorded when the dealer finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Beat the dealer.
    Won,
    /// Busted or lost to the dealer.
    Lost,
    /// Tied the dealer.
    Push,
}

/// One seated player.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// External identity.
    pub id: PlayerId,
    /// Cards held this round.
    pub hand: Vec<Card>,
    /// Finished acting this round.
    pub stood: bool,
    /// Ready to start the next round.
    pub ready: bool,
    /// Left mid-round; seat retained until reset.
    pub left: bool,
    /// Result once the round is settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl Player {
    /// A fresh, not-ready seat.
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            hand: Vec::new(),
            stood: false,
            ready: false,
            left: false,
            outcome: None,
        }
    }

    /// Current hand value.
    pub fn score(&self) -> u32 {
        score(&self.hand)
    }

    /// Whether this hand is bust.
    pub fn is_busted(&self) -> bool {
        is_busted(&self.hand)
    }

    /// Whether this player can no longer act this round.
    pub fn has_ended_round(&self) -> bool {
        self.stood || self.is_busted()
    }

    /// Clear per-round state. Keeps identity and the `left` flag.
    pub fn reset(&mut self) {
        self.hand.clear();
        self.stood = false;
        self.ready = false;
        self.outcome = None;
    }
}

/// The house seat.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dealer {
    /// Cards held this round.
    pub hand: Vec<Card>,
}

impl Dealer {
    /// A dealer with an empty hand.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current hand value.
    pub fn score(&self) -> u32 {
        score(&self.hand)
    }

    /// Whether the dealer busted.
    pub fn is_busted(&self) -> bool {
        is_busted(&self.hand)
    }

    /// House rule: keep drawing below [`DEALER_STAND_SCORE`].
    pub fn must_draw(&self) -> bool {
        self.score() < DEALER_STAND_SCORE
    }
}
