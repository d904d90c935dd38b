//! Session Redaction
//!
//! Pure mapping from the authoritative session to the view clients are
//! allowed to see. The deck never leaves the server; the dealer's hole
//! card and score stay hidden until the turn pointer has passed every
//! player.

use serde::Serialize;

use crate::game::{score, Card, GameId, Outcome, PlayerId, Status, Turn};
use crate::game::{Dealer, GameSession, Player};
use chrono::{DateTime, Utc};

/// Client-visible copy of one session. No deck field exists at all.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Session identifier.
    pub id: GameId,
    /// Lifecycle state.
    pub status: Status,
    /// All seats, hands included: player hands are public information.
    pub players: Vec<PlayerView>,
    /// Turn pointer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<Turn>,
    /// The dealer's seat, possibly masked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dealer: Option<DealerView>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Client-visible copy of one player seat.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// External identity.
    pub id: PlayerId,
    /// Cards held this round.
    pub hand: Vec<Card>,
    /// Current hand value.
    pub score: u32,
    /// Finished acting this round.
    pub stood: bool,
    /// Ready for the next round.
    pub ready: bool,
    /// Left mid-round.
    pub left: bool,
    /// Settled result, once the round finishes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

/// Client-visible copy of the dealer seat. `None` entries are face-down
/// cards.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerView {
    /// Cards, with hidden ones as `null`.
    pub hand: Vec<Option<Card>>,
    /// Hand value, withheld while a card is hidden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

fn player_view(player: &Player) -> PlayerView {
    PlayerView {
        id: player.id.clone(),
        hand: player.hand.clone(),
        score: player.score(),
        stood: player.stood,
        ready: player.ready,
        left: player.left,
        outcome: player.outcome,
    }
}

fn dealer_view(dealer: &Dealer, fully_visible: bool) -> DealerView {
    if fully_visible {
        DealerView {
            hand: dealer.hand.iter().copied().map(Some).collect(),
            score: Some(score(&dealer.hand)),
        }
    } else {
        DealerView {
            hand: dealer
                .hand
                .iter()
                .enumerate()
                .map(|(i, card)| (i == 0).then_some(*card))
                .collect(),
            score: None,
        }
    }
}

/// Produce the per-session redacted view delivered to every subscriber.
pub fn redact(session: &GameSession) -> SessionView {
    // The dealer opens up once control has passed all players.
    let dealer_plays =
        session.status == Status::Finished || session.turn == Some(Turn::Dealer);
    SessionView {
        id: session.id.clone(),
        status: session.status,
        players: session.players.iter().map(player_view).collect(),
        turn: session.turn,
        dealer: session
            .dealer
            .as_ref()
            .map(|dealer| dealer_view(dealer, dealer_plays)),
        created_at: session.created_at,
        updated_at: session.updated_at,
    }
}
