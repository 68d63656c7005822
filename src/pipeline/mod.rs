//! Repost pipeline.
//!
//! Every source post flows through:
//! 1. `FeedScanner::fetch_latest()`: newest unseen post, albums assembled
//! 2. `RewriteEngine::rewrite()`: paraphrase, falling back to the original
//! 3. `Ledger::mark_processed()`: recorded before moderation sees it
//! 4. `ModerationQueue::enqueue()`: nothing is published without approval
//!
//! **No auto-publish path exists.** Delivery to a target only follows an
//! explicit moderator approval.

pub mod album;
pub mod orchestrator;
pub mod scanner;
pub mod types;

pub use orchestrator::{CycleReport, Orchestrator, OrchestratorConfig, spawn_orchestrator};
pub use scanner::FeedScanner;
pub use types::{ChannelPair, ChatId, MediaItem, MediaKind, Post, PostKey, RawItem};
