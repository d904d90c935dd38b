//! Deck Management
//!
//! A standard 52-card deck held as a stack. Shuffling is Fisher-Yates with
//! a fresh CSPRNG-seeded generator per call so no two sessions share a
//! random stream.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::card::{Card, Rank, Suit};

/// Drawing from an empty deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no cards left in the deck")]
pub struct DeckExhausted;

/// A mutable, ordered deck of cards. `draw` pops from the top.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Deck {
    cards: Vec<Card>,
}

impl Deck {
    /// Full 52-card deck in canonical (unshuffled) order.
    pub fn standard() -> Self {
        let mut cards = Vec::with_capacity(52);
        for suit in Suit::ALL {
            for rank in Rank::ALL {
                cards.push(Card::new(rank, suit));
            }
        }
        Self { cards }
    }

    /// Freshly shuffled 52-card deck.
    pub fn shuffled() -> Self {
        let mut deck = Self::standard();
        deck.shuffle();
        deck
    }

    /// Build a deck from an explicit card order. The last card is drawn first.
    pub fn from_cards(cards: Vec<Card>) -> Self {
        Self { cards }
    }

    /// Shuffle in place with a fresh thread-local generator.
    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rand::thread_rng());
    }

    /// Shuffle in place with the supplied generator.
    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.cards.shuffle(rng);
    }

    /// Remove and return the top card.
    pub fn draw(&mut self) -> Result<Card, DeckExhausted> {
        self.cards.pop().ok_or(DeckExhausted)
    }

    /// Cards remaining.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the deck is empty.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_standard_deck_has_52_unique_cards() {
        let deck = Deck::standard();
        assert_eq!(deck.len(), 52);
        let unique: HashSet<Card> = deck.cards.iter().copied().collect();
        assert_eq!(unique.len(), 52);
    }

    #[test]
    fn test_draw_pops_from_the_top() {
        let cards = vec![
            Card::new(Rank::Two, Suit::Hearts),
            Card::new(Rank::Ace, Suit::Spades),
        ];
        let mut deck = Deck::from_cards(cards);
        assert_eq!(deck.draw().unwrap(), Card::new(Rank::Ace, Suit::Spades));
        assert_eq!(deck.draw().unwrap(), Card::new(Rank::Two, Suit::Hearts));
        assert_eq!(deck.draw(), Err(DeckExhausted));
    }

    #[test]
    fn test_shuffle_preserves_the_card_multiset() {
        let mut deck = Deck::standard();
        let before: HashSet<Card> = deck.cards.iter().copied().collect();
        let mut rng = StdRng::seed_from_u64(7);
        deck.shuffle_with(&mut rng);
        let after: HashSet<Card> = deck.cards.iter().copied().collect();
        assert_eq!(deck.len(), 52);
        assert_eq!(before, after);
    }

    #[test]
    fn test_shuffle_permutes_for_known_seed() {
        let mut deck = Deck::standard();
        let original = deck.cards.clone();
        let mut rng = StdRng::seed_from_u64(7);
        deck.shuffle_with(&mut rng);
        assert_ne!(deck.cards, original);
    }
}
