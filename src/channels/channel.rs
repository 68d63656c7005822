//! Transport traits for the feed, publish and moderator surfaces.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::moderation::model::DecisionEvent;
use crate::pipeline::types::{ChatId, MediaItem, MediaKind, RawItem};

/// Stream of moderator decisions coming back from the transport.
pub type DecisionStream = Pin<Box<dyn Stream<Item = DecisionEvent> + Send>>;

/// Which part of a sent message carries its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    Text,
    Caption,
    None,
}

/// Address of a message we sent, for later edits or deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat: ChatId,
    pub message_id: i64,
    pub body: BodyKind,
}

impl MessageHandle {
    pub fn new(chat: ChatId, message_id: i64, body: BodyKind) -> Self {
        Self {
            chat,
            message_id,
            body,
        }
    }
}

/// One inline button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlButton {
    pub label: String,
    /// Opaque callback payload, at most 64 bytes.
    pub data: String,
}

/// Inline button rows attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controls {
    pub rows: Vec<Vec<ControlButton>>,
}

impl Controls {
    pub fn row(mut self, buttons: Vec<(String, String)>) -> Self {
        self.rows.push(
            buttons
                .into_iter()
                .map(|(label, data)| ControlButton { label, data })
                .collect(),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }
}

/// Where the bytes of an outgoing media message come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Upload a local file.
    File(PathBuf),
    /// Reuse a provider-side reference from an earlier upload.
    Reference(String),
}

/// An outgoing single-media message.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub kind: MediaKind,
    pub source: MediaSource,
    /// Suppress the recipient notification (staging uploads).
    pub silent: bool,
}

impl MediaUpload {
    pub fn file(kind: MediaKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: MediaSource::File(path.into()),
            silent: false,
        }
    }

    pub fn reference(kind: MediaKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            source: MediaSource::Reference(reference.into()),
            silent: false,
        }
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Result of a media send: where it landed and its durable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMedia {
    pub handle: MessageHandle,
    pub reference: Option<String>,
}

/// One element of a grouped media send, always by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupItem {
    pub kind: MediaKind,
    pub reference: String,
    pub caption: Option<String>,
}

/// Source of raw feed items.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Most recent items of `chat`, newest first.
    async fn fetch_recent(&self, chat: &ChatId, limit: usize) -> Result<Vec<RawItem>, ChannelError>;

    /// Download `media` into `dest`, returning the number of bytes written.
    async fn download(&self, media: &MediaItem, dest: &Path) -> Result<u64, ChannelError>;
}

/// Outbound publishing surface.
#[async_trait]
pub trait PublishTransport: Send + Sync {
    async fn send_text(
        &self,
        chat: &ChatId,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<MessageHandle, ChannelError>;

    async fn send_media(
        &self,
        chat: &ChatId,
        upload: &MediaUpload,
        caption: Option<&str>,
        controls: Option<&Controls>,
    ) -> Result<SentMedia, ChannelError>;

    async fn send_media_group(
        &self,
        chat: &ChatId,
        items: &[GroupItem],
    ) -> Result<Vec<MessageHandle>, ChannelError>;

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), ChannelError>;
}

/// Moderator-facing surface: prompts with controls, edits, callback answers.
#[async_trait]
pub trait ModeratorTransport: Send + Sync {
    async fn send_decision_prompt(
        &self,
        chat: &ChatId,
        text: &str,
        controls: &Controls,
    ) -> Result<MessageHandle, ChannelError>;

    /// Replace the prompt text. `None` controls removes the buttons.
    async fn edit_prompt(
        &self,
        handle: &MessageHandle,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<(), ChannelError>;

    async fn clear_controls(&self, handle: &MessageHandle) -> Result<(), ChannelError>;

    /// Acknowledge a decision event with a short notice.
    async fn answer_decision(&self, event_id: &str, notice: &str) -> Result<(), ChannelError>;
}

/// Fetches provider-side files by reference.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download `file_ref` into `dest`, returning the number of bytes written.
    async fn fetch_file(&self, file_ref: &str, dest: &Path) -> Result<u64, ChannelError>;
}
