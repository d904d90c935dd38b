//! Cards and Hand Scoring
//!
//! Card values follow standard blackjack rules: faces count 10,
//! aces count 11 until the hand would bust, then 1.

use serde::{Deserialize, Serialize};

/// Highest hand value before busting.
pub const BUST_THRESHOLD: u32 = 21;

/// Card suit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suit {
    /// Hearts.
    Hearts,
    /// Diamonds.
    Diamonds,
    /// Clubs.
    Clubs,
    /// Spades.
    Spades,
}

impl Suit {
    /// All four suits in canonical order.
    pub const ALL: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];
}

/// Card rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rank {
    /// 2
    #[serde(rename = "2")]
    Two,
    /// 3
    #[serde(rename = "3")]
    Three,
    /// 4
    #[serde(rename = "4")]
    Four,
    /// 5
    #[serde(rename = "5")]
    Five,
    /// 6
    #[serde(rename = "6")]
    Six,
    /// 7
    #[serde(rename = "7")]
    Seven,
    /// 8
    #[serde(rename = "8")]
    Eight,
    /// 9
    #[serde(rename = "9")]
    Nine,
    /// 10
    #[serde(rename = "10")]
    Ten,
    /// Jack (counts 10).
    Jack,
    /// Queen (counts 10).
    Queen,
    /// King (counts 10).
    King,
    /// Ace (counts 11 or 1).
    Ace,
}

impl Rank {
    /// All thirteen ranks in canonical order.
    pub const ALL: [Rank; 13] = [
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
        Rank::Ace,
    ];

    /// Base value with aces counted high (11).
    pub fn base_value(self) -> u32 {
        match self {
            Rank::Two => 2,
            Rank::Three => 3,
            Rank::Four => 4,
            Rank::Five => 5,
            Rank::Six => 6,
            Rank::Seven => 7,
            Rank::Eight => 8,
            Rank::Nine => 9,
            Rank::Ten | Rank::Jack | Rank::Queen | Rank::King => 10,
            Rank::Ace => 11,
        }
    }
}

/// A single playing card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    /// Card rank.
    pub rank: Rank,
    /// Card suit.
    pub suit: Suit,
}

impl Card {
    /// Create a card.
    pub const fn new(rank: Rank, suit: Suit) -> Self {
        Self { rank, suit }
    }
}

/// Blackjack value of a hand.
///
/// Aces start at 11; while the total exceeds [`BUST_THRESHOLD`] and an ace
/// is still counted high, one ace drops to 1.
pub fn score(hand: &[Card]) -> u32 {
    let mut total = 0;
    let mut aces = 0;
    for card in hand {
        total += card.rank.base_value();
        if card.rank == Rank::Ace {
            aces += 1;
        }
    }
    while total > BUST_THRESHOLD && aces > 0 {
        total -= 10;
        aces -= 1;
    }
    total
}

/// Whether a hand's value exceeds [`BUST_THRESHOLD`].
pub fn is_busted(hand: &[Card]) -> bool {
    score(hand) > BUST_THRESHOLD
}
