//! Event Fan-out Gateway
//!
//! Bridges WebSocket clients to the session event stream. Tracks one
//! registered identity per connection, session subscriptions, and a
//! reconnect grace window; consumes the published event channel and
//! delivers redacted session views to every live subscriber. Game rules
//! are never enforced here: client actions are only enqueued.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::engine::{ActionKind, ActionRequest, EventResult, GameEvent};
use crate::game::{GameId, PlayerId};
use crate::store::{keys, Store, StoreError, StoreResult, Subscription};

use super::protocol::{ClientMessage, ServerMessage, SessionEvent};
use super::view::redact;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent registered connections.
    pub max_connections: usize,
    /// Liveness probe interval.
    pub heartbeat_interval: Duration,
    /// How long a disconnected identity may resume before being treated
    /// as having left.
    pub reconnect_window: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("valid default bind address"),
            max_connections: 1000,
            heartbeat_interval: Duration::from_secs(10),
            reconnect_window: Duration::from_secs(30),
        }
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to bind the listener.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Store error while setting up the event subscription.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Registration refused.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
    /// The identity already has a live connection.
    #[error("player already registered")]
    AlreadyRegistered,
}

/// What happened when a registration was accepted.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// Brand-new identity.
    Fresh,
    /// Resumed within the grace window; subscriptions kept.
    Reconnected,
    /// The previous incarnation expired: its subscriptions were torn
    /// down and a `leave` must be enqueued for each listed session.
    ExpiredPrevious {
        /// Sessions the stale identity was subscribed to.
        stale_games: Vec<GameId>,
    },
}

/// One tracked identity: a live sender, or a disconnect timestamp while
/// the grace window runs.
struct ConnectionEntry {
    sender: Option<mpsc::Sender<Message>>,
    disconnected_at: Option<Instant>,
    alive: bool,
}

impl ConnectionEntry {
    fn is_connected(&self) -> bool {
        self.sender.is_some()
    }
}

/// Connection and subscription tables. Private to the gateway process;
/// shared only between the connection handlers and the periodic sweep.
#[derive(Default)]
pub(crate) struct Registry {
    connections: HashMap<PlayerId, ConnectionEntry>,
    subscriptions: HashMap<GameId, HashSet<PlayerId>>,
}

impl Registry {
    fn connected_count(&self) -> usize {
        self.connections.values().filter(|e| e.is_connected()).count()
    }

    /// Register an identity on a new connection.
    fn register(
        &mut self,
        id: &PlayerId,
        sender: mpsc::Sender<Message>,
        window: Duration,
    ) -> Result<RegisterOutcome, RegisterError> {
        let outcome = match self.connections.get(id) {
            Some(entry) if entry.is_connected() => return Err(RegisterError::AlreadyRegistered),
            Some(entry) => match entry.disconnected_at {
                Some(at) if at.elapsed() <= window => RegisterOutcome::Reconnected,
                _ => RegisterOutcome::ExpiredPrevious {
                    stale_games: self.teardown(id),
                },
            },
            None => RegisterOutcome::Fresh,
        };
        self.connections.insert(
            id.clone(),
            ConnectionEntry {
                sender: Some(sender),
                disconnected_at: None,
                alive: true,
            },
        );
        Ok(outcome)
    }

    /// Drop an identity and all its subscriptions; returns the sessions
    /// it was subscribed to.
    fn teardown(&mut self, id: &PlayerId) -> Vec<GameId> {
        self.connections.remove(id);
        let mut stale = Vec::new();
        self.subscriptions.retain(|game_id, subscribers| {
            if subscribers.remove(id) {
                stale.push(game_id.clone());
            }
            !subscribers.is_empty()
        });
        stale
    }

    fn subscribe(&mut self, game_id: &GameId, player_id: &PlayerId) {
        self.subscriptions
            .entry(game_id.clone())
            .or_default()
            .insert(player_id.clone());
    }

    fn unsubscribe(&mut self, game_id: &GameId, player_id: &PlayerId) {
        if let Some(subscribers) = self.subscriptions.get_mut(game_id) {
            subscribers.remove(player_id);
            if subscribers.is_empty() {
                self.subscriptions.remove(game_id);
            }
        }
    }

    /// Start the grace window for an identity whose connection closed.
    /// Only acts if `sender` still identifies the current connection, so
    /// a late close from a replaced connection cannot clobber its
    /// successor.
    fn mark_disconnected(&mut self, id: &PlayerId, sender: &mpsc::Sender<Message>) {
        if let Some(entry) = self.connections.get_mut(id) {
            if entry.sender.as_ref().is_some_and(|s| s.same_channel(sender)) {
                entry.sender = None;
                entry.alive = false;
                entry.disconnected_at.get_or_insert_with(Instant::now);
            }
        }
    }

    /// A pong arrived on the given connection.
    fn mark_alive(&mut self, id: &PlayerId, sender: &mpsc::Sender<Message>) {
        if let Some(entry) = self.connections.get_mut(id) {
            if entry.sender.as_ref().is_some_and(|s| s.same_channel(sender)) {
                entry.alive = true;
            }
        }
    }

    /// One probe round: terminate connections that missed the previous
    /// probe, arm the rest, and return their senders for pinging.
    fn heartbeat(&mut self) -> Vec<mpsc::Sender<Message>> {
        let mut pings = Vec::new();
        for (id, entry) in &mut self.connections {
            if !entry.is_connected() {
                continue;
            }
            if entry.alive {
                entry.alive = false;
                if let Some(sender) = &entry.sender {
                    pings.push(sender.clone());
                }
            } else {
                debug!(player = %id, "connection unresponsive; terminating");
                entry.sender = None;
                entry.disconnected_at = Some(Instant::now());
            }
        }
        pings
    }

    /// Remove identities disconnected past the grace window. Returns each
    /// with the sessions it must be force-left from.
    fn expire(&mut self, window: Duration) -> Vec<(PlayerId, Vec<GameId>)> {
        let expired: Vec<PlayerId> = self
            .connections
            .iter()
            .filter(|(_, entry)| {
                !entry.is_connected()
                    && entry
                        .disconnected_at
                        .is_some_and(|at| at.elapsed() > window)
            })
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .map(|id| {
                let games = self.teardown(&id);
                (id, games)
            })
            .collect()
    }

    /// Live senders for every subscriber of a session.
    fn live_subscribers(&self, game_id: &GameId) -> Vec<(PlayerId, mpsc::Sender<Message>)> {
        let Some(subscribers) = self.subscriptions.get(game_id) else {
            return Vec::new();
        };
        subscribers
            .iter()
            .filter_map(|id| {
                let sender = self.connections.get(id)?.sender.clone()?;
                Some((id.clone(), sender))
            })
            .collect()
    }

    /// Live sender for one identity.
    fn sender(&self, id: &PlayerId) -> Option<mpsc::Sender<Message>> {
        self.connections.get(id)?.sender.clone()
    }

    #[allow(dead_code)]
    fn is_subscribed(&self, game_id: &GameId, player_id: &PlayerId) -> bool {
        self.subscriptions
            .get(game_id)
            .is_some_and(|subs| subs.contains(player_id))
    }
}

/// The fan-out gateway process.
pub struct Gateway {
    store: Arc<dyn Store>,
    config: GatewayConfig,
    registry: Arc<RwLock<Registry>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Gateway {
    /// Build a gateway against the given store.
    pub fn new(store: Arc<dyn Store>, config: GatewayConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            config,
            registry: Arc::new(RwLock::new(Registry::default())),
            shutdown_tx,
        }
    }

    /// Run the gateway: event pump, heartbeat sweep, and accept loop.
    pub async fn run(&self) -> Result<(), GatewayError> {
        // Subscribe before accepting connections so no event is missed.
        let subscription = self.store.subscribe(keys::EVENTS_CHANNEL).await?;
        self.spawn_event_pump(subscription);
        self.spawn_sweep_loop();

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("gateway listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let connected = self.registry.read().await.connected_count();
                            if connected >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("new connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Signal the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Registered connection count.
    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connected_count()
    }

    /// Forward published events to subscribers until the channel closes.
    fn spawn_event_pump(&self, mut subscription: Subscription) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            while let Some(payload) = subscription.next().await {
                match serde_json::from_str::<GameEvent>(&payload) {
                    Ok(event) => Self::handle_event(&registry, event).await,
                    Err(err) => debug!("dropping unparseable event: {err}"),
                }
            }
            warn!("event subscription closed");
        });
    }

    /// Deliver one published event: update subscriptions, redact, fan out.
    async fn handle_event(registry: &Arc<RwLock<Registry>>, event: GameEvent) {
        match event.result {
            EventResult::Success => {
                let Some(session) = &event.data else { return };
                let game_id = session.id.clone();
                {
                    let mut registry = registry.write().await;
                    match (event.kind, &event.player_id) {
                        (ActionKind::Create | ActionKind::Join, Some(player_id)) => {
                            registry.subscribe(&game_id, player_id);
                        }
                        (ActionKind::Leave, Some(player_id)) => {
                            registry.unsubscribe(&game_id, player_id);
                        }
                        _ => {}
                    }
                }

                let message = ServerMessage::Event(SessionEvent {
                    kind: event.kind,
                    result: event.result,
                    data: redact(session),
                    player_id: event.player_id.clone(),
                });
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(err) => {
                        error!("failed to encode session event: {err}");
                        return;
                    }
                };

                let recipients = registry.read().await.live_subscribers(&game_id);
                for (player_id, sender) in recipients {
                    if sender.send(Message::Text(json.clone())).await.is_err() {
                        debug!(player = %player_id, "failed to deliver session event");
                    }
                }
            }
            EventResult::Failed => {
                // Failure events go only to the originating player.
                let Some(player_id) = event.player_id.clone() else { return };
                let sender = registry.read().await.sender(&player_id);
                if let Some(sender) = sender {
                    let message = ServerMessage::FailureEvent { error: event };
                    if let Ok(json) = message.to_json() {
                        let _ = sender.send(Message::Text(json)).await;
                    }
                }
            }
        }
    }

    /// Periodic heartbeat and grace-window sweep.
    fn spawn_sweep_loop(&self) {
        let registry = self.registry.clone();
        let store = self.store.clone();
        let probe_interval = self.config.heartbeat_interval;
        let window = self.config.reconnect_window;
        tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            loop {
                ticker.tick().await;
                let (pings, expired) = {
                    let mut registry = registry.write().await;
                    (registry.heartbeat(), registry.expire(window))
                };
                for sender in pings {
                    let _ = sender.send(Message::Ping(Vec::new())).await;
                }
                for (player_id, games) in expired {
                    info!(player = %player_id, "grace window elapsed; forcing leave");
                    for game_id in games {
                        Self::enqueue_leave(&store, &player_id, &game_id).await;
                    }
                }
            }
        });
    }

    async fn enqueue_leave(store: &Arc<dyn Store>, player_id: &PlayerId, game_id: &GameId) {
        let request = ActionRequest::new(
            ActionKind::Leave,
            Some(player_id.clone()),
            Some(game_id.clone()),
        );
        if let Err(err) = Self::enqueue(store, &request).await {
            error!(player = %player_id, game = %game_id, "failed to enqueue forced leave: {err}");
        }
    }

    async fn enqueue(store: &Arc<dyn Store>, request: &ActionRequest) -> StoreResult<()> {
        let json = match serde_json::to_string(request) {
            Ok(json) => json,
            Err(err) => {
                error!("failed to encode action request: {err}");
                return Ok(());
            }
        };
        store.queue_push(keys::TASK_QUEUE, &json).await
    }

    /// Handle one WebSocket connection for its whole lifetime.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let registry = self.registry.clone();
        let store = self.store.clone();
        let window = self.config.reconnect_window;

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(64);

            // Writer task: everything for this client funnels through one
            // channel so the sweep can ping without touching the socket.
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    if ws_sender.send(msg).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut registered: Option<PlayerId> = None;

            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        Self::handle_client_text(
                            &text,
                            addr,
                            &mut registered,
                            &registry,
                            &store,
                            &msg_tx,
                            window,
                        )
                        .await;
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = msg_tx.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Pong(_)) => {
                        if let Some(id) = &registered {
                            registry.write().await.mark_alive(id, &msg_tx);
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Transient disconnect: keep subscriptions for the grace window.
            if let Some(id) = &registered {
                registry.write().await.mark_disconnected(id, &msg_tx);
                debug!(player = %id, "client disconnected");
            }
            sender_task.abort();
        });
    }

    /// Handle one text frame from a client.
    async fn handle_client_text(
        text: &str,
        addr: SocketAddr,
        registered: &mut Option<PlayerId>,
        registry: &Arc<RwLock<Registry>>,
        store: &Arc<dyn Store>,
        msg_tx: &mpsc::Sender<Message>,
        window: Duration,
    ) {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(err) => {
                debug!("invalid message from {}: {}", addr, err);
                Self::send(msg_tx, ServerMessage::error("Invalid message format")).await;
                return;
            }
        };

        match message {
            ClientMessage::Register { player_id } => {
                let outcome = registry
                    .write()
                    .await
                    .register(&player_id, msg_tx.clone(), window);
                match outcome {
                    Ok(outcome) => {
                        if let RegisterOutcome::ExpiredPrevious { stale_games } = &outcome {
                            for game_id in stale_games {
                                Self::enqueue_leave(store, &player_id, game_id).await;
                            }
                        }
                        info!(player = %player_id, %addr, "player registered");
                        *registered = Some(player_id.clone());
                        Self::send(msg_tx, ServerMessage::registered(player_id)).await;
                    }
                    Err(RegisterError::AlreadyRegistered) => {
                        Self::send(msg_tx, ServerMessage::error("Player already registered"))
                            .await;
                    }
                }
            }
            action_message => {
                let Some(player_id) = registered.clone() else {
                    Self::send(msg_tx, ServerMessage::error("Register first")).await;
                    return;
                };
                let Some((kind, game_id)) = action_message.action() else {
                    return;
                };
                let request = ActionRequest::new(kind, Some(player_id), game_id);
                debug!(action = %kind, id = %request.id, "enqueueing action");
                if Self::enqueue(store, &request).await.is_err() {
                    Self::send(msg_tx, ServerMessage::error("Failed to submit action")).await;
                }
            }
        }
    }

    async fn send(msg_tx: &mpsc::Sender<Message>, message: ServerMessage) {
        match message.to_json() {
            Ok(json) => {
                let _ = msg_tx.send(Message::Text(json)).await;
            }
            Err(err) => error!("failed to encode server message: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GameEvent;
    use crate::game::GameSession;
    use crate::store::MemoryStore;
    use tokio::time::timeout;

    fn sender() -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
        mpsc::channel(8)
    }

    fn pid(s: &str) -> PlayerId {
        PlayerId::from(s)
    }

    fn gid(s: &str) -> GameId {
        GameId::from(s)
    }

    const WINDOW: Duration = Duration::from_secs(30);

    #[test]
    fn test_fresh_registration_and_duplicate_rejection() {
        let mut registry = Registry::default();
        let (tx, _rx) = sender();
        assert!(matches!(
            registry.register(&pid("p1"), tx.clone(), WINDOW),
            Ok(RegisterOutcome::Fresh)
        ));
        let (tx2, _rx2) = sender();
        assert_eq!(
            registry.register(&pid("p1"), tx2, WINDOW).unwrap_err(),
            RegisterError::AlreadyRegistered
        );
    }

    #[test]
    fn test_reconnect_within_window_keeps_subscriptions() {
        let mut registry = Registry::default();
        let (tx, _rx) = sender();
        registry.register(&pid("p1"), tx.clone(), WINDOW).unwrap();
        registry.subscribe(&gid("g1"), &pid("p1"));

        registry.mark_disconnected(&pid("p1"), &tx);
        assert!(registry.sender(&pid("p1")).is_none());

        let (tx2, _rx2) = sender();
        assert!(matches!(
            registry.register(&pid("p1"), tx2, WINDOW),
            Ok(RegisterOutcome::Reconnected)
        ));
        assert!(registry.is_subscribed(&gid("g1"), &pid("p1")));
        assert_eq!(registry.live_subscribers(&gid("g1")).len(), 1);
    }

    #[tokio::test]
    async fn test_expired_registration_tears_down_and_reports_stale_games() {
        let mut registry = Registry::default();
        let (tx, _rx) = sender();
        registry.register(&pid("p1"), tx.clone(), WINDOW).unwrap();
        registry.subscribe(&gid("g1"), &pid("p1"));
        registry.subscribe(&gid("g2"), &pid("p1"));

        registry.mark_disconnected(&pid("p1"), &tx);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (tx2, _rx2) = sender();
        let outcome = registry
            .register(&pid("p1"), tx2, Duration::from_millis(1))
            .unwrap();
        match outcome {
            RegisterOutcome::ExpiredPrevious { mut stale_games } => {
                stale_games.sort();
                assert_eq!(stale_games, vec![gid("g1"), gid("g2")]);
            }
            other => panic!("expected expiry, got {other:?}"),
        }
        assert!(!registry.is_subscribed(&gid("g1"), &pid("p1")));
        assert!(!registry.is_subscribed(&gid("g2"), &pid("p1")));
    }

    #[tokio::test]
    async fn test_sweep_expires_identities_past_the_window() {
        let mut registry = Registry::default();
        let (tx, _rx) = sender();
        registry.register(&pid("p1"), tx.clone(), WINDOW).unwrap();
        registry.subscribe(&gid("g1"), &pid("p1"));
        registry.mark_disconnected(&pid("p1"), &tx);

        // Still inside the window: nothing expires.
        assert!(registry.expire(WINDOW).is_empty());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let expired = registry.expire(Duration::from_millis(1));
        assert_eq!(expired.len(), 1);
        let (player_id, games) = &expired[0];
        assert_eq!(player_id, &pid("p1"));
        assert_eq!(games, &vec![gid("g1")]);
        assert!(registry.sender(&pid("p1")).is_none());
    }

    #[test]
    fn test_heartbeat_terminates_unresponsive_connections() {
        let mut registry = Registry::default();
        let (tx, _rx) = sender();
        registry.register(&pid("p1"), tx, WINDOW).unwrap();

        // First probe: connection was alive, gets pinged and disarmed.
        assert_eq!(registry.heartbeat().len(), 1);
        // No pong arrived: second probe terminates it.
        assert!(registry.heartbeat().is_empty());
        assert!(registry.sender(&pid("p1")).is_none());

        // Termination starts the grace window rather than dropping state.
        assert!(registry.connections.contains_key(&pid("p1")));
    }

    #[test]
    fn test_pong_keeps_a_connection_alive() {
        let mut registry = Registry::default();
        let (tx, _rx) = sender();
        registry.register(&pid("p1"), tx.clone(), WINDOW).unwrap();

        assert_eq!(registry.heartbeat().len(), 1);
        registry.mark_alive(&pid("p1"), &tx);
        assert_eq!(registry.heartbeat().len(), 1);
        assert!(registry.sender(&pid("p1")).is_some());
    }

    #[test]
    fn test_stale_close_cannot_clobber_a_replacement_connection() {
        let mut registry = Registry::default();
        let (old_tx, _old_rx) = sender();
        registry.register(&pid("p1"), old_tx.clone(), WINDOW).unwrap();
        registry.mark_disconnected(&pid("p1"), &old_tx);

        let (new_tx, _new_rx) = sender();
        registry.register(&pid("p1"), new_tx, WINDOW).unwrap();

        // The old connection's close arrives late; it must be ignored.
        registry.mark_disconnected(&pid("p1"), &old_tx);
        assert!(registry.sender(&pid("p1")).is_some());
    }

    #[tokio::test]
    async fn test_success_events_fan_out_to_subscribers_redacted() {
        let registry = Arc::new(RwLock::new(Registry::default()));
        let (tx, mut rx) = sender();
        registry
            .write()
            .await
            .register(&pid("p1"), tx, WINDOW)
            .unwrap();

        let mut session = GameSession::new();
        session.add_player(pid("p1")).unwrap();
        let event = GameEvent::success(ActionKind::Create, pid("p1"), &session);
        Gateway::handle_event(&registry, event).await;

        // The create event subscribed p1 and delivered the view.
        let delivered = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::Text(json) = delivered else {
            panic!("expected a text frame");
        };
        assert!(json.contains("\"type\":\"create\""));
        assert!(!json.contains("deck"));
        assert!(registry.read().await.is_subscribed(&session.id, &pid("p1")));
    }

    #[tokio::test]
    async fn test_failure_events_reach_only_the_originating_player() {
        let registry = Arc::new(RwLock::new(Registry::default()));
        let (tx1, mut rx1) = sender();
        let (tx2, mut rx2) = sender();
        registry
            .write()
            .await
            .register(&pid("p1"), tx1, WINDOW)
            .unwrap();
        registry
            .write()
            .await
            .register(&pid("p2"), tx2, WINDOW)
            .unwrap();

        let event = GameEvent::failure(ActionKind::Hit, Some(pid("p2")), "not-players-turn");
        Gateway::handle_event(&registry, event).await;

        let delivered = timeout(Duration::from_secs(1), rx2.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::Text(json) = delivered else {
            panic!("expected a text frame");
        };
        assert!(json.contains("\"error\""));
        assert!(json.contains("not-players-turn"));

        assert!(
            timeout(Duration::from_millis(50), rx1.recv()).await.is_err(),
            "bystanders must not see failure events"
        );
    }

    #[tokio::test]
    async fn test_leave_event_unsubscribes_the_leaver() {
        let registry = Arc::new(RwLock::new(Registry::default()));
        let (tx, _rx) = sender();
        registry
            .write()
            .await
            .register(&pid("p1"), tx, WINDOW)
            .unwrap();

        let mut session = GameSession::new();
        session.add_player(pid("p1")).unwrap();
        let game_id = session.id.clone();

        let join = GameEvent::success(ActionKind::Create, pid("p1"), &session);
        Gateway::handle_event(&registry, join).await;
        assert!(registry.read().await.is_subscribed(&game_id, &pid("p1")));

        session.remove_player(&pid("p1")).unwrap();
        let leave = GameEvent::success(ActionKind::Leave, pid("p1"), &session);
        Gateway::handle_event(&registry, leave).await;
        assert!(!registry.read().await.is_subscribed(&game_id, &pid("p1")));
    }

    #[tokio::test]
    async fn test_register_message_flow_acknowledges_and_enqueues_actions() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let registry = Arc::new(RwLock::new(Registry::default()));
        let (msg_tx, mut msg_rx) = sender();
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let mut registered = None;

        // Actions before registration are refused.
        Gateway::handle_client_text(
            r#"{"action":"create"}"#,
            addr,
            &mut registered,
            &registry,
            &store,
            &msg_tx,
            WINDOW,
        )
        .await;
        let Message::Text(json) = msg_rx.recv().await.unwrap() else {
            panic!("expected a text frame");
        };
        assert!(json.contains("Register first"));

        Gateway::handle_client_text(
            r#"{"action":"register","playerId":"p1"}"#,
            addr,
            &mut registered,
            &registry,
            &store,
            &msg_tx,
            WINDOW,
        )
        .await;
        assert_eq!(registered, Some(pid("p1")));
        let Message::Text(json) = msg_rx.recv().await.unwrap() else {
            panic!("expected a text frame");
        };
        assert_eq!(json, r#"{"success":true,"playerId":"p1"}"#);

        // A registered client's action lands on the task queue.
        Gateway::handle_client_text(
            r#"{"action":"create"}"#,
            addr,
            &mut registered,
            &registry,
            &store,
            &msg_tx,
            WINDOW,
        )
        .await;
        let queued = store.queue_pop(keys::TASK_QUEUE).await.unwrap();
        let request: ActionRequest = serde_json::from_str(&queued).unwrap();
        assert_eq!(request.action, ActionKind::Create);
        assert_eq!(request.player_id, Some(pid("p1")));
    }

    #[tokio::test]
    async fn test_expired_registration_enqueues_forced_leaves() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let registry = Arc::new(RwLock::new(Registry::default()));
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        // A previous incarnation subscribed to g1 and went away.
        {
            let mut reg = registry.write().await;
            let (old_tx, _old_rx) = sender();
            reg.register(&pid("p1"), old_tx.clone(), WINDOW).unwrap();
            reg.subscribe(&gid("g1"), &pid("p1"));
            reg.mark_disconnected(&pid("p1"), &old_tx);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (msg_tx, mut msg_rx) = sender();
        let mut registered = None;
        Gateway::handle_client_text(
            r#"{"action":"register","playerId":"p1"}"#,
            addr,
            &mut registered,
            &registry,
            &store,
            &msg_tx,
            Duration::from_millis(1),
        )
        .await;

        // Registration still succeeds for the new incarnation...
        let Message::Text(json) = msg_rx.recv().await.unwrap() else {
            panic!("expected a text frame");
        };
        assert!(json.contains("\"success\":true"));

        // ...and a leave was enqueued for the stale subscription.
        let queued = store.queue_pop(keys::TASK_QUEUE).await.unwrap();
        let request: ActionRequest = serde_json::from_str(&queued).unwrap();
        assert_eq!(request.action, ActionKind::Leave);
        assert_eq!(request.player_id, Some(pid("p1")));
        assert_eq!(request.game_id, Some(gid("g1")));
        assert!(!registry.read().await.is_subscribed(&gid("g1"), &pid("p1")));
    }
}
