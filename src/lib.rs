//! # Blackjack Coordination Server
//!
//! Coordinates concurrent, turn-based blackjack sessions across any
//! number of stateless worker processes, with a shared store providing
//! persistence, mutual exclusion, and event distribution.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   BLACKJACK SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Pure rules (no I/O)                       │
//! │  ├── card.rs     - Cards and hand scoring                    │
//! │  ├── deck.rs     - 52-card deck, shuffle, draw               │
//! │  ├── player.rs   - Player and dealer seats                   │
//! │  └── session.rs  - Session aggregate + state machine         │
//! │                                                              │
//! │  store/          - Shared coordination store                 │
//! │  ├── mod.rs      - Contract: kv + queue + pub/sub + locks    │
//! │  ├── memory.rs   - In-process adapter (tests, single node)   │
//! │  └── redis.rs    - Redis adapter (production)                │
//! │                                                              │
//! │  engine/         - Action processing                         │
//! │  ├── lock.rs     - Distributed per-session lock              │
//! │  ├── action.rs   - Requests, events, task records            │
//! │  └── processor.rs- Lock, mutate, persist+publish loop        │
//! │                                                              │
//! │  gateway/        - Client edge                               │
//! │  ├── protocol.rs - WebSocket wire messages                   │
//! │  ├── view.rs     - Session redaction                         │
//! │  └── server.rs   - Connections, heartbeat, fan-out           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Guarantee
//!
//! Every mutation of a session happens under that session's distributed
//! lock, and the new record is persisted and its event published as one
//! atomic store operation: no observer can see a write without its event
//! or an event for an unwritten state. Worker crashes are bounded by the
//! lock TTL. Clients never see the deck or the dealer's hole card before
//! the dealer's turn.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod game;
pub mod gateway;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use engine::{ActionKind, ActionRequest, Engine, GameEvent, LockConfig};
pub use game::{GameId, GameSession, PlayerId};
pub use gateway::{Gateway, GatewayConfig};
pub use store::{MemoryStore, RedisStore, Store};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
