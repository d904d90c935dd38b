//! Action Processor
//!
//! The single point where queued action requests become committed state
//! changes. Each worker runs one sequential consume loop: pop a request,
//! lock its session, apply the state machine, persist the result and
//! publish the event as one atomic step, release the lock. Failures of
//! any kind still produce exactly one (failure) event per request.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::game::{GameSession, PlayerId, RuleError, Status};
use crate::store::{keys, Store, StoreResult};

use super::action::{ActionError, ActionKind, ActionRequest, GameEvent, TaskRecord};
use super::lock::{LockConfig, SessionLock};

/// Queue consumer worker.
pub struct Engine {
    store: Arc<dyn Store>,
    lock_config: LockConfig,
}

impl Engine {
    /// Build a worker against the given store.
    pub fn new(store: Arc<dyn Store>, lock_config: LockConfig) -> Self {
        Self { store, lock_config }
    }

    /// Consume the task queue forever. Returns only if the blocking pop
    /// itself fails, which means the store connection is gone.
    pub async fn run(&self) -> StoreResult<()> {
        info!("action processor consuming from {}", keys::TASK_QUEUE);
        loop {
            let raw = self.store.queue_pop(keys::TASK_QUEUE).await?;
            self.process_raw(&raw).await;
        }
    }

    /// Handle one raw queue payload.
    pub async fn process_raw(&self, raw: &str) {
        match serde_json::from_str::<ActionRequest>(raw) {
            Ok(request) => self.process(request).await,
            // No request id to answer to; all we can do is log it.
            Err(err) => warn!("discarding malformed action request: {err}"),
        }
    }

    /// Handle one parsed request: apply it, then record the task result.
    /// Success events are published atomically with the session write;
    /// failure events are published here.
    pub async fn process(&self, request: ActionRequest) {
        debug!(id = %request.id, action = %request.action, "processing action");
        let result = self.dispatch(&request).await;
        if let Err(err) = &result {
            warn!(id = %request.id, action = %request.action, "action failed: {err}");
            let event = GameEvent::failure(request.action, request.player_id.clone(), err.reason());
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if let Err(publish_err) = self.store.publish(keys::EVENTS_CHANNEL, &json).await
                    {
                        error!("failed to publish failure event: {publish_err}");
                    }
                }
                Err(encode_err) => error!("failed to encode failure event: {encode_err}"),
            }
        }
        self.record_task(&request, &result).await;
    }

    async fn dispatch(&self, request: &ActionRequest) -> Result<GameSession, ActionError> {
        match request.action {
            ActionKind::Create => self.create(request).await,
            ActionKind::Join => {
                self.with_locked_session(request, |s, p| s.add_player(p.clone()))
                    .await
            }
            ActionKind::Ready => self.with_locked_session(request, |s, p| s.set_ready(p)).await,
            ActionKind::Hit => self.with_locked_session(request, |s, p| s.hit(p)).await,
            ActionKind::Stand => self.with_locked_session(request, |s, p| s.stand(p)).await,
            ActionKind::Leave => {
                self.with_locked_session(request, |s, p| s.remove_player(p))
                    .await
            }
            ActionKind::Reset => self.with_locked_session(request, |s, _| s.reset()).await,
        }
    }

    /// `create` needs no lock: the session does not exist yet. The record
    /// and the success event still land atomically, then the session is
    /// registered in the waiting index.
    async fn create(&self, request: &ActionRequest) -> Result<GameSession, ActionError> {
        let player_id = request.player_id()?.clone();
        let mut session = GameSession::new();
        session.add_player(player_id.clone())?;

        let event = GameEvent::success(ActionKind::Create, player_id, &session);
        self.store
            .set_and_publish(
                &keys::game(&session.id),
                &serde_json::to_string(&session)?,
                keys::EVENTS_CHANNEL,
                &serde_json::to_string(&event)?,
            )
            .await?;
        self.store
            .index_push(keys::WAITING_INDEX, session.id.as_str())
            .await?;
        info!(game = %session.id, "session created");
        Ok(session)
    }

    /// Scoped acquisition: the lock is released on every exit path, and
    /// the mutation inside commits via a single set-and-publish.
    async fn with_locked_session<F>(
        &self,
        request: &ActionRequest,
        transition: F,
    ) -> Result<GameSession, ActionError>
    where
        F: FnOnce(&mut GameSession, &PlayerId) -> Result<(), RuleError> + Send,
    {
        let game_id = request.game_id()?.clone();
        let player_id = request.player_id()?.clone();

        let Some(lock) =
            SessionLock::acquire(self.store.clone(), &game_id, &self.lock_config).await?
        else {
            return Err(ActionError::LockTimeout);
        };

        let result = self.apply_locked(request, &player_id, transition).await;

        match lock.release().await {
            Ok(true) => {}
            Ok(false) => warn!(game = %game_id, "session lock expired before release"),
            Err(err) => warn!(game = %game_id, "failed to release session lock: {err}"),
        }
        result
    }

    /// Runs while the session lock is held.
    async fn apply_locked<F>(
        &self,
        request: &ActionRequest,
        player_id: &PlayerId,
        transition: F,
    ) -> Result<GameSession, ActionError>
    where
        F: FnOnce(&mut GameSession, &PlayerId) -> Result<(), RuleError> + Send,
    {
        let game_id = request.game_id()?;
        let key = keys::game(game_id);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or(ActionError::GameNotFound)?;
        let mut session: GameSession = serde_json::from_str(&raw)?;
        let status_before = session.status;

        transition(&mut session, player_id)?;

        let event = GameEvent::success(request.action, player_id.clone(), &session);
        let event_json = serde_json::to_string(&event)?;

        let emptied_lobby = request.action == ActionKind::Leave
            && session.status == Status::Waiting
            && session.player_count() == 0;
        if emptied_lobby {
            self.store
                .delete_and_publish(&key, keys::EVENTS_CHANNEL, &event_json)
                .await?;
            self.store
                .index_remove(keys::WAITING_INDEX, game_id.as_str())
                .await?;
            info!(game = %game_id, "last player left; session removed");
        } else {
            self.store
                .set_and_publish(
                    &key,
                    &serde_json::to_string(&session)?,
                    keys::EVENTS_CHANNEL,
                    &event_json,
                )
                .await?;
            if status_before == Status::Waiting && session.status == Status::Active {
                self.store
                    .index_remove(keys::WAITING_INDEX, game_id.as_str())
                    .await?;
                info!(game = %game_id, "round started");
            }
            // A reset lobby is joinable again.
            if status_before == Status::Finished && session.status == Status::Waiting {
                self.store
                    .index_push(keys::WAITING_INDEX, game_id.as_str())
                    .await?;
            }
        }
        Ok(session)
    }

    async fn record_task(
        &self,
        request: &ActionRequest,
        result: &Result<GameSession, ActionError>,
    ) {
        let record = match result {
            Ok(session) => TaskRecord::success(request, session),
            Err(err) => TaskRecord::failure(request, err),
        };
        match serde_json::to_string(&record) {
            Ok(json) => {
                if let Err(err) = self.store.set(&keys::task(&request.id), &json).await {
                    warn!(id = %request.id, "failed to persist task record: {err}");
                }
            }
            Err(err) => warn!(id = %request.id, "failed to encode task record: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::action::{EventResult, TaskStatus};
    use crate::game::{GameId, Turn};
    use crate::store::{MemoryStore, Subscription};
    use std::time::Duration;
    use tokio::time::timeout;

    fn fast_lock_config() -> LockConfig {
        LockConfig {
            ttl: Duration::from_secs(5),
            retry_interval: Duration::from_millis(5),
            acquire_timeout: Duration::from_millis(30),
        }
    }

    async fn setup() -> (Engine, Arc<dyn Store>, Subscription) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let sub = store.subscribe(keys::EVENTS_CHANNEL).await.unwrap();
        let engine = Engine::new(store.clone(), fast_lock_config());
        (engine, store, sub)
    }

    async fn next_event(sub: &mut Subscription) -> GameEvent {
        let payload = timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("expected an event")
            .expect("subscription closed");
        serde_json::from_str(&payload).unwrap()
    }

    fn request(action: ActionKind, player: &str, game: Option<&GameId>) -> ActionRequest {
        ActionRequest::new(
            action,
            Some(PlayerId::from(player)),
            game.cloned(),
        )
    }

    /// Drive create + join + both readies; returns the active session.
    async fn start_two_player_game(
        engine: &Engine,
        sub: &mut Subscription,
    ) -> GameSession {
        engine.process(request(ActionKind::Create, "p1", None)).await;
        let created = next_event(sub).await.data.unwrap();
        let game_id = created.id.clone();

        engine
            .process(request(ActionKind::Join, "p2", Some(&game_id)))
            .await;
        next_event(sub).await;
        engine
            .process(request(ActionKind::Ready, "p1", Some(&game_id)))
            .await;
        next_event(sub).await;
        engine
            .process(request(ActionKind::Ready, "p2", Some(&game_id)))
            .await;
        let started = next_event(sub).await;
        assert_eq!(started.result, EventResult::Success);
        started.data.unwrap()
    }

    #[tokio::test]
    async fn test_create_persists_registers_and_publishes() {
        let (engine, store, mut sub) = setup().await;
        let req = request(ActionKind::Create, "p1", None);
        let task_id = req.id.clone();
        engine.process(req).await;

        let event = next_event(&mut sub).await;
        assert_eq!(event.kind, ActionKind::Create);
        assert_eq!(event.result, EventResult::Success);
        let session = event.data.unwrap();
        assert_eq!(session.player_count(), 1);
        assert!(session.has_player(&PlayerId::from("p1")));

        assert!(store.get(&keys::game(&session.id)).await.unwrap().is_some());
        assert_eq!(
            store.queue_pop(keys::WAITING_INDEX).await.unwrap(),
            session.id.as_str()
        );

        let record: TaskRecord = serde_json::from_str(
            &store.get(&keys::task(&task_id)).await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(record.status, TaskStatus::Success);
        assert!(record.session.is_some());
    }

    #[tokio::test]
    async fn test_full_round_reaches_settlement_and_resets() {
        let (engine, store, mut sub) = setup().await;
        let session = start_two_player_game(&engine, &mut sub).await;
        assert_eq!(session.status, Status::Active);
        assert_eq!(session.turn, Some(Turn::Player(0)));
        let game_id = session.id.clone();

        engine
            .process(request(ActionKind::Stand, "p1", Some(&game_id)))
            .await;
        let after_first = next_event(&mut sub).await.data.unwrap();
        assert_eq!(after_first.turn, Some(Turn::Player(1)));

        engine
            .process(request(ActionKind::Stand, "p2", Some(&game_id)))
            .await;
        let finished = next_event(&mut sub).await.data.unwrap();
        assert_eq!(finished.status, Status::Finished);
        assert!(finished.players.iter().all(|p| p.outcome.is_some()));
        let dealer = finished.dealer.as_ref().unwrap();
        assert!(dealer.score() >= 17 || dealer.is_busted());

        engine
            .process(request(ActionKind::Reset, "p1", Some(&game_id)))
            .await;
        let lobby = next_event(&mut sub).await.data.unwrap();
        assert_eq!(lobby.status, Status::Waiting);
        assert!(lobby.players.iter().all(|p| p.hand.is_empty() && !p.ready));
        // The reset lobby is back in the waiting index.
        assert_eq!(
            store.queue_pop(keys::WAITING_INDEX).await.unwrap(),
            game_id.as_str()
        );
    }

    #[tokio::test]
    async fn test_start_removes_session_from_waiting_index() {
        let (engine, store, mut sub) = setup().await;
        start_two_player_game(&engine, &mut sub).await;
        // The index entry was consumed by activation; a pop now blocks.
        let empty = timeout(
            Duration::from_millis(50),
            store.queue_pop(keys::WAITING_INDEX),
        )
        .await;
        assert!(empty.is_err());
    }

    #[tokio::test]
    async fn test_missing_game_id_fails_before_any_lock() {
        let (engine, store, mut sub) = setup().await;
        let req = ActionRequest::new(ActionKind::Join, Some(PlayerId::from("p1")), None);
        engine.process(req).await;

        let event = next_event(&mut sub).await;
        assert_eq!(event.result, EventResult::Failed);
        assert_eq!(event.reason.as_deref(), Some("missing-field"));
        assert!(event.data.is_none());
        // No lock key was ever written.
        assert!(store
            .get(&keys::lock(&GameId::from("g-any")))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_game_fails_with_game_not_found() {
        let (engine, _store, mut sub) = setup().await;
        let ghost = GameId::from("no-such-game");
        engine
            .process(request(ActionKind::Hit, "p1", Some(&ghost)))
            .await;
        let event = next_event(&mut sub).await;
        assert_eq!(event.result, EventResult::Failed);
        assert_eq!(event.reason.as_deref(), Some("game-not-found"));
    }

    #[tokio::test]
    async fn test_rule_violation_leaves_the_record_untouched() {
        let (engine, store, mut sub) = setup().await;
        let session = start_two_player_game(&engine, &mut sub).await;
        let game_id = session.id.clone();
        let before = store.get(&keys::game(&game_id)).await.unwrap().unwrap();

        // p2 acts out of turn.
        engine
            .process(request(ActionKind::Hit, "p2", Some(&game_id)))
            .await;
        let event = next_event(&mut sub).await;
        assert_eq!(event.result, EventResult::Failed);
        assert_eq!(event.reason.as_deref(), Some("not-players-turn"));

        let after = store.get(&keys::game(&game_id)).await.unwrap().unwrap();
        assert_eq!(before, after, "rejected actions must not persist anything");
        // The lock was released on the failure path.
        assert!(store.get(&keys::lock(&game_id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contended_session_reports_lock_timeout() {
        let (engine, store, mut sub) = setup().await;
        let session = start_two_player_game(&engine, &mut sub).await;
        let game_id = session.id.clone();
        let before = store.get(&keys::game(&game_id)).await.unwrap().unwrap();

        // Another worker holds the lock for longer than our retry window.
        assert!(store
            .set_if_absent(&keys::lock(&game_id), "other-worker", Duration::from_secs(5))
            .await
            .unwrap());

        engine
            .process(request(ActionKind::Stand, "p1", Some(&game_id)))
            .await;
        let event = next_event(&mut sub).await;
        assert_eq!(event.result, EventResult::Failed);
        assert_eq!(event.reason.as_deref(), Some("lock-timeout"));

        // Nothing persisted, and the contender still owns the lock.
        let after = store.get(&keys::game(&game_id)).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(
            store.get(&keys::lock(&game_id)).await.unwrap().as_deref(),
            Some("other-worker")
        );
    }

    #[tokio::test]
    async fn test_last_player_leaving_lobby_deletes_the_session() {
        let (engine, store, mut sub) = setup().await;
        engine.process(request(ActionKind::Create, "p1", None)).await;
        let session = next_event(&mut sub).await.data.unwrap();
        let game_id = session.id.clone();

        engine
            .process(request(ActionKind::Leave, "p1", Some(&game_id)))
            .await;
        let event = next_event(&mut sub).await;
        assert_eq!(event.kind, ActionKind::Leave);
        assert_eq!(event.result, EventResult::Success);
        assert_eq!(event.data.unwrap().player_count(), 0);

        assert!(store.get(&keys::game(&game_id)).await.unwrap().is_none());
        let empty_index = timeout(
            Duration::from_millis(50),
            store.queue_pop(keys::WAITING_INDEX),
        )
        .await;
        assert!(empty_index.is_err());
    }

    #[tokio::test]
    async fn test_failed_actions_still_write_task_records() {
        let (engine, store, mut sub) = setup().await;
        let ghost = GameId::from("no-such-game");
        let req = request(ActionKind::Stand, "p1", Some(&ghost));
        let task_id = req.id.clone();
        engine.process(req).await;
        next_event(&mut sub).await;

        let record: TaskRecord = serde_json::from_str(
            &store.get(&keys::task(&task_id)).await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.reason.as_deref(), Some("game-not-found"));
        assert!(record.session.is_none());
    }

    #[tokio::test]
    async fn test_malformed_queue_payload_is_dropped_quietly() {
        let (engine, _store, mut sub) = setup().await;
        engine.process_raw("this is not json").await;
        let nothing = timeout(Duration::from_millis(50), sub.next()).await;
        assert!(nothing.is_err(), "malformed payloads produce no events");
    }
}
