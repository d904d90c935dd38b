//! Game Logic Module
//!
//! Pure blackjack rules and the session state machine. Nothing here
//! performs I/O: the engine applies these transitions under the session
//! lock, and the gateway only ever ships redacted views of the result.
//!
//! ## Module Structure
//!
//! - `card`: Cards and hand scoring
//! - `deck`: 52-card deck, shuffle, draw
//! - `player`: Player and dealer seats, round outcomes
//! - `session`: The session aggregate and its transitions

pub mod card;
pub mod deck;
pub mod player;
pub mod session;

// Re-export key types
pub use card::{is_busted, score, Card, Rank, Suit, BUST_THRESHOLD};
pub use deck::{Deck, DeckExhausted};
pub use player::{Dealer, Outcome, Player, PlayerId, DEALER_STAND_SCORE};
pub use session::{GameId, GameSession, RuleError, Status, Turn, MAX_PLAYERS, MIN_PLAYERS_TO_START};
