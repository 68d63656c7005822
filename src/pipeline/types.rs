//! Shared types for the repost pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on moderator-requested regenerations per post.
pub const MAX_REGENERATIONS: u32 = 5;

/// Placeholder text for posts that carry media but no words.
pub const MEDIA_ONLY_SENTINEL: &str = "[Сообщение содержит медиа-контент]";

// ── Chat handles ────────────────────────────────────────────────────

/// Opaque chat handle: numeric (`-100…`) or symbolic (`@name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric channel id with the `-100` supergroup prefix stripped.
    pub fn internal_channel_id(&self) -> Option<&str> {
        self.0
            .strip_prefix("-100")
            .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
    }

    /// Public username without the leading `@`.
    pub fn username(&self) -> Option<&str> {
        self.0.strip_prefix('@').filter(|u| !u.is_empty())
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Channel pair ────────────────────────────────────────────────────

/// A monitored source and the destination its posts are republished to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPair {
    pub source: ChatId,
    pub target: ChatId,
    /// Display label shown to the moderator.
    #[serde(default)]
    pub name: Option<String>,
    /// Public username of the source, used for original-post links.
    #[serde(default)]
    pub username: Option<String>,
}

impl ChannelPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: ChatId::new(source),
            target: ChatId::new(target),
            name: None,
            username: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} → {}", self.source, self.target))
    }

    /// Public link to a message in the source, when one can be formed.
    pub fn original_link(&self, message_id: i64) -> String {
        if let Some(username) = self
            .username
            .as_deref()
            .map(|u| u.trim_start_matches('@'))
            .filter(|u| !u.is_empty())
        {
            return format!("https://t.me/{username}/{message_id}");
        }
        if let Some(internal) = self.source.internal_channel_id() {
            return format!("https://t.me/c/{internal}/{message_id}");
        }
        if let Some(username) = self.source.username() {
            return format!("https://t.me/{username}/{message_id}");
        }
        format!("Message ID: {message_id}")
    }
}

// ── Media ───────────────────────────────────────────────────────────

/// Media kind, resolved once at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Animation,
}

impl MediaKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Animation => "animation",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Photo => "jpg",
            Self::Video | Self::Animation => "mp4",
            Self::Document => "bin",
        }
    }

    /// Kind used inside a grouped send. Groups cannot hold animations.
    pub fn group_kind(&self) -> Self {
        match self {
            Self::Animation => Self::Document,
            other => *other,
        }
    }
}

/// One media attachment of a source message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    /// Provider file reference usable for download.
    pub file_ref: String,
    pub source_message_id: i64,
    /// Size reported by the provider, when known.
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl MediaItem {
    pub fn new(kind: MediaKind, file_ref: impl Into<String>, source_message_id: i64) -> Self {
        Self {
            kind,
            file_ref: file_ref.into(),
            source_message_id,
            file_size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }
}

// ── Feed items ──────────────────────────────────────────────────────

/// A single message as fetched from a feed, before assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub media: Option<MediaItem>,
    /// Correlation id shared by all items of one album.
    pub group_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RawItem {
    pub fn text(id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: Some(text.into()),
            caption: None,
            media: None,
            group_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn media(id: i64, kind: MediaKind, file_ref: impl Into<String>) -> Self {
        Self {
            id,
            text: None,
            caption: None,
            media: Some(MediaItem::new(kind, file_ref, id)),
            group_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Body text, falling back to the caption for media messages.
    pub fn body(&self) -> Option<&str> {
        let text = self.text.as_deref().filter(|t| !t.trim().is_empty());
        match (text, &self.media) {
            (Some(t), _) => Some(t),
            (None, Some(_)) => self.caption.as_deref().filter(|c| !c.trim().is_empty()),
            (None, None) => None,
        }
    }
}

// ── Post ────────────────────────────────────────────────────────────

/// Composite key `<source>_<firstItemId>`, recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostKey(pub String);

impl PostKey {
    pub fn new(source: &ChatId, first_item_id: i64) -> Self {
        Self(format!("{source}_{first_item_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery shape of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostShape {
    Text,
    SingleMedia,
    Album,
}

/// A publishable unit: a standalone message or an assembled album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub source: ChatId,
    pub target: ChatId,
    /// Provider message ids, ascending. Never empty.
    pub item_ids: Vec<i64>,
    pub original_text: String,
    pub rewritten_text: Option<String>,
    pub media: Vec<MediaItem>,
    pub regeneration_count: u32,
    pub pair_label: String,
    pub original_link: String,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Build a standalone post from one feed item.
    pub fn standalone(pair: &ChannelPair, item: &RawItem, text: String) -> Self {
        Self {
            source: pair.source.clone(),
            target: pair.target.clone(),
            item_ids: vec![item.id],
            original_text: text,
            rewritten_text: None,
            media: item.media.iter().cloned().collect(),
            regeneration_count: 0,
            pair_label: pair.label(),
            original_link: pair.original_link(item.id),
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> PostKey {
        PostKey::new(&self.source, self.first_item_id())
    }

    pub fn first_item_id(&self) -> i64 {
        self.item_ids.first().copied().unwrap_or_default()
    }

    pub fn item_count(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_album(&self) -> bool {
        self.item_count() > 1
    }

    pub fn shape(&self) -> PostShape {
        if self.is_album() && !self.media.is_empty() {
            PostShape::Album
        } else if self.media.is_empty() {
            PostShape::Text
        } else {
            PostShape::SingleMedia
        }
    }

    /// Text to publish: the rewrite when present, the original otherwise.
    pub fn publish_text(&self) -> &str {
        self.rewritten_text.as_deref().unwrap_or(&self.original_text)
    }

    pub fn with_rewrite(mut self, text: impl Into<String>) -> Self {
        self.rewritten_text = Some(text.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_key_uses_first_item() {
        let pair = ChannelPair::new("-1001234", "@dest");
        let mut post = Post::standalone(&pair, &RawItem::text(42, "hi"), "hi".into());
        assert_eq!(post.key().as_str(), "-1001234_42");
        post.item_ids = vec![40, 41, 42];
        assert_eq!(post.key().as_str(), "-1001234_40");
        assert!(post.is_album());
    }

    #[test]
    fn original_link_variants() {
        let numeric = ChannelPair::new("-1001234567", "@dest");
        assert_eq!(numeric.original_link(7), "https://t.me/c/1234567/7");

        let symbolic = ChannelPair::new("@news", "@dest");
        assert_eq!(symbolic.original_link(7), "https://t.me/news/7");

        let configured = ChannelPair::new("-1001234567", "@dest").with_username("@public");
        assert_eq!(configured.original_link(7), "https://t.me/public/7");

        let opaque = ChannelPair::new("12345", "@dest");
        assert_eq!(opaque.original_link(7), "Message ID: 7");
    }

    #[test]
    fn body_falls_back_to_caption_for_media() {
        let item = RawItem::media(1, MediaKind::Photo, "f1").with_caption("caption");
        assert_eq!(item.body(), Some("caption"));

        let plain = RawItem::text(2, "   ");
        assert_eq!(plain.body(), None);
    }

    #[test]
    fn shape_follows_media_and_count() {
        let pair = ChannelPair::new("@s", "@t");
        let text = Post::standalone(&pair, &RawItem::text(1, "x"), "x".into());
        assert_eq!(text.shape(), PostShape::Text);

        let single = Post::standalone(&pair, &RawItem::media(2, MediaKind::Video, "v"), "x".into());
        assert_eq!(single.shape(), PostShape::SingleMedia);
    }

    #[test]
    fn animation_grouped_as_document() {
        assert_eq!(MediaKind::Animation.group_kind(), MediaKind::Document);
        assert_eq!(MediaKind::Photo.group_kind(), MediaKind::Photo);
    }
}
