//! Action Requests, Events, and Task Records
//!
//! Wire types flowing through the shared store: queued action requests
//! (gateway -> processor), published session events (processor -> gateway),
//! and the per-action result record persisted under `task:<id>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::game::{GameId, GameSession, PlayerId, RuleError};
use crate::store::StoreError;

/// The set of player-issued actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Allocate a fresh session with the requester seated.
    Create,
    /// Take a seat in an existing lobby.
    Join,
    /// Ready up; the round starts once everyone is ready.
    Ready,
    /// Draw a card.
    Hit,
    /// End the turn.
    Stand,
    /// Leave the session.
    Leave,
    /// Return a finished session to the lobby.
    Reset,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Create => "create",
            ActionKind::Join => "join",
            ActionKind::Ready => "ready",
            ActionKind::Hit => "hit",
            ActionKind::Stand => "stand",
            ActionKind::Leave => "leave",
            ActionKind::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// One queued action request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    /// Unique request id; the task record is keyed by it.
    pub id: String,
    /// Requested transition.
    pub action: ActionKind,
    /// Acting player.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    /// Target session; absent for `create`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
}

impl ActionRequest {
    /// Build a request with a fresh id.
    pub fn new(action: ActionKind, player_id: Option<PlayerId>, game_id: Option<GameId>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            player_id,
            game_id,
        }
    }

    /// The acting player, or `MissingField` if absent.
    pub fn player_id(&self) -> Result<&PlayerId, ActionError> {
        self.player_id
            .as_ref()
            .ok_or(ActionError::MissingField("playerId"))
    }

    /// The target session, or `MissingField` if absent.
    pub fn game_id(&self) -> Result<&GameId, ActionError> {
        self.game_id
            .as_ref()
            .ok_or(ActionError::MissingField("gameId"))
    }
}

/// Why an action did not commit.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Required field absent from the request; rejected before any lock.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The referenced session record does not exist.
    #[error("game not found")]
    GameNotFound,

    /// The session stayed locked for the whole acquisition window.
    /// Transient: resubmitting the same action is safe.
    #[error("timed out acquiring the session lock")]
    LockTimeout,

    /// The state machine rejected the transition.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// A persisted session record failed to decode.
    #[error("corrupt session record: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The store itself failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ActionError {
    /// Stable reason code carried by failure events.
    pub fn reason(&self) -> &'static str {
        match self {
            ActionError::MissingField(_) => "missing-field",
            ActionError::GameNotFound => "game-not-found",
            ActionError::LockTimeout => "lock-timeout",
            ActionError::Rule(rule) => rule.reason(),
            ActionError::Corrupt(_) | ActionError::Store(_) => "internal-error",
        }
    }
}

/// Whether an event reports a committed transition or a rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventResult {
    /// The transition committed and `data` carries the new session.
    Success,
    /// The action was rejected; `reason` says why.
    Failed,
}

/// One session event on the pub/sub channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    /// The action this event answers.
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Committed or rejected.
    pub result: EventResult,
    /// Full session payload on success; never present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<GameSession>,
    /// Originating player.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    /// Reason code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GameEvent {
    /// A committed-transition event.
    pub fn success(kind: ActionKind, player_id: PlayerId, session: &GameSession) -> Self {
        Self {
            kind,
            result: EventResult::Success,
            data: Some(session.clone()),
            player_id: Some(player_id),
            reason: None,
        }
    }

    /// A rejection event; carries no session payload.
    pub fn failure(kind: ActionKind, player_id: Option<PlayerId>, reason: &str) -> Self {
        Self {
            kind,
            result: EventResult::Failed,
            data: None,
            player_id,
            reason: Some(reason.to_string()),
        }
    }
}

/// Task record status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The action committed.
    Success,
    /// The action was rejected or failed.
    Error,
}

/// Result record persisted under `task:<id>` for every processed action.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Originating request id.
    pub id: String,
    /// Requested action.
    pub action: ActionKind,
    /// Final disposition.
    pub status: TaskStatus,
    /// Target session when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    /// Reason code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When processing finished.
    pub completed_at: DateTime<Utc>,
    /// Session payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<GameSession>,
}

impl TaskRecord {
    /// Record a committed action.
    pub fn success(request: &ActionRequest, session: &GameSession) -> Self {
        Self {
            id: request.id.clone(),
            action: request.action,
            status: TaskStatus::Success,
            game_id: Some(session.id.clone()),
            reason: None,
            completed_at: Utc::now(),
            session: Some(session.clone()),
        }
    }

    /// Record a rejected or failed action.
    pub fn failure(request: &ActionRequest, error: &ActionError) -> Self {
        Self {
            id: request.id.clone(),
            action: request.action,
            status: TaskStatus::Error,
            game_id: request.game_id.clone(),
            reason: Some(error.reason().to_string()),
            completed_at: Utc::now(),
            session: None,
        }
    }
}
