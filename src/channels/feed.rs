//! Channel post buffer: the bot's view of its source channels.
//!
//! The Bot API has no history endpoint, so posts are captured as they
//! arrive on the update stream and kept per chat. The scanner reads the
//! most recent ones through [`FeedSource`].

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::channel::{FeedSource, MediaFetcher};
use crate::error::ChannelError;
use crate::pipeline::types::{ChatId, MediaItem, RawItem};

/// Posts retained per chat.
pub const BUFFER_CAPACITY: usize = 50;

/// Bounded, newest-first store of channel posts.
pub struct ChannelPostBuffer {
    posts: RwLock<HashMap<String, VecDeque<RawItem>>>,
    /// Lowercased username → numeric chat id.
    aliases: RwLock<HashMap<String, String>>,
    capacity: usize,
    fetcher: Arc<dyn MediaFetcher>,
}

impl ChannelPostBuffer {
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self::with_capacity(fetcher, BUFFER_CAPACITY)
    }

    pub fn with_capacity(fetcher: Arc<dyn MediaFetcher>, capacity: usize) -> Self {
        Self {
            posts: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            fetcher,
        }
    }

    /// Record a post from `chat_id`. An item with an id already held
    /// replaces the earlier version (edited posts).
    pub async fn push(&self, chat_id: &str, username: Option<&str>, item: RawItem) {
        if let Some(name) = username {
            let name = normalize_username(name);
            if !name.is_empty() {
                self.aliases
                    .write()
                    .await
                    .insert(name, chat_id.to_string());
            }
        }

        let mut posts = self.posts.write().await;
        let queue = posts.entry(chat_id.to_string()).or_default();
        queue.retain(|existing| existing.id != item.id);

        let position = queue
            .iter()
            .position(|existing| existing.id < item.id)
            .unwrap_or(queue.len());
        debug!(chat = chat_id, id = item.id, "Buffered channel post");
        queue.insert(position, item);
        queue.truncate(self.capacity);
    }

    /// Number of chats with buffered posts.
    pub async fn chat_count(&self) -> usize {
        self.posts.read().await.len()
    }

    async fn resolve(&self, chat: &ChatId) -> String {
        match chat.username() {
            Some(name) => self
                .aliases
                .read()
                .await
                .get(&normalize_username(name))
                .cloned()
                .unwrap_or_else(|| chat.to_string()),
            None => chat.to_string(),
        }
    }
}

fn normalize_username(name: &str) -> String {
    name.trim().trim_start_matches('@').to_lowercase()
}

#[async_trait]
impl FeedSource for ChannelPostBuffer {
    async fn fetch_recent(&self, chat: &ChatId, limit: usize) -> Result<Vec<RawItem>, ChannelError> {
        let key = self.resolve(chat).await;
        let posts = self.posts.read().await;
        Ok(posts
            .get(&key)
            .map(|queue| queue.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn download(&self, media: &MediaItem, dest: &Path) -> Result<u64, ChannelError> {
        self.fetcher.fetch_file(&media.file_ref, dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::MediaKind;

    struct EchoFetcher;

    #[async_trait]
    impl MediaFetcher for EchoFetcher {
        async fn fetch_file(&self, file_ref: &str, dest: &Path) -> Result<u64, ChannelError> {
            tokio::fs::write(dest, file_ref).await?;
            Ok(file_ref.len() as u64)
        }
    }

    fn buffer(capacity: usize) -> ChannelPostBuffer {
        ChannelPostBuffer::with_capacity(Arc::new(EchoFetcher), capacity)
    }

    fn ids(items: &[RawItem]) -> Vec<i64> {
        items.iter().map(|i| i.id).collect()
    }

    #[tokio::test]
    async fn returns_newest_first_even_out_of_order() {
        let buf = buffer(10);
        buf.push("-1001", None, RawItem::text(1, "a")).await;
        buf.push("-1001", None, RawItem::text(3, "c")).await;
        buf.push("-1001", None, RawItem::text(2, "b")).await;

        let items = buf.fetch_recent(&ChatId::new("-1001"), 10).await.unwrap();
        assert_eq!(ids(&items), vec![3, 2, 1]);
        let items = buf.fetch_recent(&ChatId::new("-1001"), 2).await.unwrap();
        assert_eq!(ids(&items), vec![3, 2]);
    }

    #[tokio::test]
    async fn capacity_drops_oldest() {
        let buf = buffer(3);
        for id in 1..=5 {
            buf.push("c", None, RawItem::text(id, "x")).await;
        }
        let items = buf.fetch_recent(&ChatId::new("c"), 10).await.unwrap();
        assert_eq!(ids(&items), vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn edited_post_replaces_original() {
        let buf = buffer(10);
        buf.push("c", None, RawItem::text(1, "draft")).await;
        buf.push("c", None, RawItem::text(1, "final")).await;
        let items = buf.fetch_recent(&ChatId::new("c"), 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text.as_deref(), Some("final"));
    }

    #[tokio::test]
    async fn username_resolves_to_chat_id() {
        let buf = buffer(10);
        buf.push("-100777", Some("NewsChannel"), RawItem::text(4, "hi"))
            .await;

        let items = buf
            .fetch_recent(&ChatId::new("@newschannel"), 10)
            .await
            .unwrap();
        assert_eq!(ids(&items), vec![4]);
        assert!(buf.fetch_recent(&ChatId::new("@other"), 10).await.unwrap().is_empty());
        assert_eq!(buf.chat_count().await, 1);
    }

    #[tokio::test]
    async fn download_goes_through_fetcher() {
        let buf = buffer(10);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("m.jpg");
        let media = MediaItem::new(MediaKind::Photo, "file-abc", 1);

        let n = buf.download(&media, &dest).await.unwrap();
        assert_eq!(n, 8);
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "file-abc");
    }
}
