//! Client Protocol
//!
//! Wire format for the WebSocket connection. All messages are JSON. The
//! first message on a connection must be a registration; everything after
//! that is an action forwarded to the processor queue.

use serde::{Deserialize, Serialize};

use crate::engine::{ActionKind, EventResult, GameEvent};
use crate::game::{GameId, PlayerId};

use super::view::SessionView;

// =============================================================================
// CLIENT -> GATEWAY MESSAGES
// =============================================================================

/// Messages sent from client to gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Declare this connection's player identity. Required first.
    #[serde(rename_all = "camelCase")]
    Register {
        /// The identity to register.
        player_id: PlayerId,
    },

    /// Create a new session with the registered player seated.
    Create,

    /// Join an existing session.
    #[serde(rename_all = "camelCase")]
    Join {
        /// Target session.
        game_id: GameId,
    },

    /// Ready up in the lobby.
    #[serde(rename_all = "camelCase")]
    Ready {
        /// Target session.
        game_id: GameId,
    },

    /// Draw a card.
    #[serde(rename_all = "camelCase")]
    Hit {
        /// Target session.
        game_id: GameId,
    },

    /// End the turn.
    #[serde(rename_all = "camelCase")]
    Stand {
        /// Target session.
        game_id: GameId,
    },

    /// Leave the session.
    #[serde(rename_all = "camelCase")]
    Leave {
        /// Target session.
        game_id: GameId,
    },

    /// Return a finished session to the lobby.
    #[serde(rename_all = "camelCase")]
    Reset {
        /// Target session.
        game_id: GameId,
    },
}

impl ClientMessage {
    /// Parse from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The queued action this message maps to; `None` for registration.
    pub fn action(&self) -> Option<(ActionKind, Option<GameId>)> {
        match self {
            ClientMessage::Register { .. } => None,
            ClientMessage::Create => Some((ActionKind::Create, None)),
            ClientMessage::Join { game_id } => Some((ActionKind::Join, Some(game_id.clone()))),
            ClientMessage::Ready { game_id } => Some((ActionKind::Ready, Some(game_id.clone()))),
            ClientMessage::Hit { game_id } => Some((ActionKind::Hit, Some(game_id.clone()))),
            ClientMessage::Stand { game_id } => Some((ActionKind::Stand, Some(game_id.clone()))),
            ClientMessage::Leave { game_id } => Some((ActionKind::Leave, Some(game_id.clone()))),
            ClientMessage::Reset { game_id } => Some((ActionKind::Reset, Some(game_id.clone()))),
        }
    }
}

// =============================================================================
// GATEWAY -> CLIENT MESSAGES
// =============================================================================

/// A session event as delivered to subscribers: the processor's event
/// with the session replaced by its redacted view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// The action that produced this event.
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Always `success`; failures take the error shape instead.
    pub result: EventResult,
    /// Redacted session.
    pub data: SessionView,
    /// Originating player.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
}

/// Messages pushed from gateway to client.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Registration accepted.
    #[serde(rename_all = "camelCase")]
    Registered {
        /// Always `true`.
        success: bool,
        /// The registered identity.
        player_id: PlayerId,
    },

    /// A redacted session event.
    Event(SessionEvent),

    /// A failure event, delivered only to the originating player.
    FailureEvent {
        /// The processor's failure event, unredacted (it carries no session).
        error: GameEvent,
    },

    /// A connection-layer error.
    Error {
        /// Human-readable description.
        error: String,
    },
}

impl ServerMessage {
    /// Registration acknowledgement.
    pub fn registered(player_id: PlayerId) -> Self {
        ServerMessage::Registered {
            success: true,
            player_id,
        }
    }

    /// Connection-layer error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: message.into(),
        }
    }

    /// Encode for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_message_parses() {
        let msg = ClientMessage::from_json(r#"{"action":"register","playerId":"p1"}"#).unwrap();
        match msg {
            ClientMessage::Register { player_id } => assert_eq!(player_id.as_str(), "p1"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_action_messages_map_to_queue_actions() {
        let msg = ClientMessage::from_json(r#"{"action":"hit","gameId":"g1"}"#).unwrap();
        let (kind, game_id) = msg.action().unwrap();
        assert_eq!(kind, ActionKind::Hit);
        assert_eq!(game_id.unwrap().as_str(), "g1");

        let msg = ClientMessage::from_json(r#"{"action":"create"}"#).unwrap();
        let (kind, game_id) = msg.action().unwrap();
        assert_eq!(kind, ActionKind::Create);
        assert!(game_id.is_none());
    }

    #[test]
    fn test_register_is_not_an_action() {
        let msg = ClientMessage::from_json(r#"{"action":"register","playerId":"p1"}"#).unwrap();
        assert!(msg.action().is_none());
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(ClientMessage::from_json(r#"{"action":"surrender","gameId":"g1"}"#).is_err());
    }

    #[test]
    fn test_registered_reply_shape() {
        let json = ServerMessage::registered(PlayerId::from("p1"))
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"success":true,"playerId":"p1"}"#);
    }

    #[test]
    fn test_error_reply_shape() {
        let json = ServerMessage::error("Invalid message format").to_json().unwrap();
        assert_eq!(json, r#"{"error":"Invalid message format"}"#);
    }
}
