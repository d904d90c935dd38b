//! Engine Module
//!
//! Turns queued action requests into committed session state: the
//! distributed per-session lock, the action/event/task wire types, and
//! the consume-loop processor.
//!
//! ## Module Structure
//!
//! - `lock`: Distributed session lock with retry and identity-checked release
//! - `action`: Queue messages, events, task records, error taxonomy
//! - `processor`: The lock -> load -> transition -> persist+publish loop

pub mod action;
pub mod lock;
pub mod processor;

// Re-export key types
pub use action::{ActionError, ActionKind, ActionRequest, EventResult, GameEvent, TaskRecord, TaskStatus};
pub use lock::{LockConfig, SessionLock};
pub use processor::Engine;
