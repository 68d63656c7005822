//! Reposter: monitored channels in, moderated rewrites out.

pub mod channels;
pub mod config;
pub mod delivery;
pub mod error;
pub mod llm;
pub mod moderation;
pub mod pipeline;
pub mod rewrite;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
