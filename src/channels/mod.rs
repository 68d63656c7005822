//! Transport abstraction: feed ingestion, publishing, moderator prompts.

pub mod channel;
pub mod feed;
pub mod telegram;

pub use channel::*;
pub use feed::ChannelPostBuffer;
pub use telegram::TelegramBot;
