//! Human moderation gate.
//!
//! Rewritten posts wait in the [`ModerationQueue`] until a moderator
//! approves, rejects or asks for a regeneration. A post leaves the queue
//! on approve, reject, or after its TTL; a second decision on a post that
//! already left reports it as stale.

pub mod handler;
pub mod model;
pub mod notify;
pub mod queue;
pub mod render;

pub use handler::{DecisionHandler, spawn_decision_handler};
pub use model::{DecisionAction, DecisionEvent, PendingEntry, callback_token};
pub use notify::ModeratorNotifier;
pub use queue::{DecisionOutcome, ModerationQueue};
