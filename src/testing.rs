//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::channels::{
    BodyKind, Controls, FeedSource, GroupItem, MediaSource, MediaUpload, MessageHandle,
    ModeratorTransport, PublishTransport, SentMedia,
};
use crate::error::{ChannelError, RewriteError};
use crate::pipeline::types::{ChatId, MediaItem, MediaKind, RawItem};
use crate::rewrite::TextTransformer;

// ── Feed ────────────────────────────────────────────────────────────

/// Feed with scripted items. Downloads write the file reference as content.
#[derive(Default)]
pub struct MockFeed {
    items: Mutex<HashMap<String, Vec<RawItem>>>,
    failing: Mutex<HashSet<String>>,
    empty: Mutex<HashSet<String>>,
    slow: Mutex<HashMap<String, Duration>>,
    slow_once: Mutex<HashMap<String, Duration>>,
    downloads: Mutex<Vec<String>>,
    fetch_fails: AtomicBool,
}

impl MockFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Items for `chat`, newest first.
    pub fn set_items(&self, chat: &str, items: Vec<RawItem>) {
        self.items.lock().unwrap().insert(chat.to_string(), items);
    }

    pub fn fail_download(&self, file_ref: &str) {
        self.failing.lock().unwrap().insert(file_ref.to_string());
    }

    pub fn empty_download(&self, file_ref: &str) {
        self.empty.lock().unwrap().insert(file_ref.to_string());
    }

    pub fn slow_download(&self, file_ref: &str, delay: Duration) {
        self.slow.lock().unwrap().insert(file_ref.to_string(), delay);
    }

    /// Only the first download of `file_ref` is slow.
    pub fn slow_first_download(&self, file_ref: &str, delay: Duration) {
        self.slow_once
            .lock()
            .unwrap()
            .insert(file_ref.to_string(), delay);
    }

    pub fn download_attempts(&self, file_ref: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .filter(|r| *r == file_ref)
            .count()
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fetch_fails.store(fail, Ordering::SeqCst);
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for MockFeed {
    async fn fetch_recent(&self, chat: &ChatId, limit: usize) -> Result<Vec<RawItem>, ChannelError> {
        if self.fetch_fails.load(Ordering::SeqCst) {
            return Err(ChannelError::Http("feed unavailable".into()));
        }
        let items = self.items.lock().unwrap();
        Ok(items
            .get(chat.as_str())
            .map(|v| v.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn download(&self, media: &MediaItem, dest: &Path) -> Result<u64, ChannelError> {
        self.downloads.lock().unwrap().push(media.file_ref.clone());

        let once = self.slow_once.lock().unwrap().remove(&media.file_ref);
        let delay = once.or_else(|| self.slow.lock().unwrap().get(&media.file_ref).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&media.file_ref) {
            return Err(ChannelError::DownloadFailed {
                name: "mock".into(),
                reason: "scripted failure".into(),
            });
        }
        let content = if self.empty.lock().unwrap().contains(&media.file_ref) {
            Vec::new()
        } else {
            media.file_ref.clone().into_bytes()
        };
        tokio::fs::write(dest, &content).await?;
        Ok(content.len() as u64)
    }
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum SentRecord {
    Text {
        chat: String,
        text: String,
        controls: Option<Controls>,
        handle: MessageHandle,
    },
    Media {
        chat: String,
        kind: MediaKind,
        source: MediaSource,
        caption: Option<String>,
        controls: Option<Controls>,
        silent: bool,
        handle: MessageHandle,
    },
    Group {
        chat: String,
        items: Vec<GroupItem>,
    },
}

/// Records every outgoing call. Media references are `ref-<file content>`.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<SentRecord>>,
    deleted: Mutex<Vec<MessageHandle>>,
    edits: Mutex<Vec<(MessageHandle, String, bool)>>,
    cleared: Mutex<Vec<MessageHandle>>,
    answers: Mutex<Vec<(String, String)>>,
    next_id: AtomicI64,
    text_fails: AtomicBool,
    group_fails: AtomicBool,
    prompt_fails: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(100),
            ..Self::default()
        })
    }

    pub fn fail_text(&self, fail: bool) {
        self.text_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_group(&self, fail: bool) {
        self.group_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_prompt(&self, fail: bool) {
        self.prompt_fails.store(fail, Ordering::SeqCst);
    }

    fn handle(&self, chat: &ChatId, body: BodyKind) -> MessageHandle {
        MessageHandle::new(chat.clone(), self.next_id.fetch_add(1, Ordering::SeqCst), body)
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self, chat: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|r| match r {
                SentRecord::Text { chat: c, text, .. } if c == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Text messages with their controls.
    pub fn prompts(&self, chat: &str) -> Vec<(String, Option<Controls>)> {
        self.sent()
            .into_iter()
            .filter_map(|r| match r {
                SentRecord::Text {
                    chat: c,
                    text,
                    controls,
                    ..
                } if c == chat => Some((text, controls)),
                _ => None,
            })
            .collect()
    }

    pub fn groups(&self, chat: &str) -> Vec<Vec<GroupItem>> {
        self.sent()
            .into_iter()
            .filter_map(|r| match r {
                SentRecord::Group { chat: c, items } if c == chat => Some(items),
                _ => None,
            })
            .collect()
    }

    pub fn media_to(&self, chat: &str) -> Vec<(MediaSource, Option<String>)> {
        self.sent()
            .into_iter()
            .filter_map(|r| match r {
                SentRecord::Media {
                    chat: c,
                    source,
                    caption,
                    ..
                } if c == chat => Some((source, caption)),
                _ => None,
            })
            .collect()
    }

    pub fn media_count(&self, chat: &str) -> usize {
        self.media_to(chat).len()
    }

    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.deleted.lock().unwrap().clone()
    }

    /// Prompt edits as `(handle, text, has_controls)`.
    pub fn edits(&self) -> Vec<(MessageHandle, String, bool)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn cleared(&self) -> Vec<MessageHandle> {
        self.cleared.lock().unwrap().clone()
    }

    pub fn answers(&self) -> Vec<(String, String)> {
        self.answers.lock().unwrap().clone()
    }
}

#[async_trait]
impl PublishTransport for MockTransport {
    async fn send_text(
        &self,
        chat: &ChatId,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<MessageHandle, ChannelError> {
        if self.text_fails.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed {
                name: "mock".into(),
                reason: "scripted text failure".into(),
            });
        }
        let handle = self.handle(chat, BodyKind::Text);
        self.sent.lock().unwrap().push(SentRecord::Text {
            chat: chat.to_string(),
            text: text.to_string(),
            controls: controls.cloned(),
            handle: handle.clone(),
        });
        Ok(handle)
    }

    async fn send_media(
        &self,
        chat: &ChatId,
        upload: &MediaUpload,
        caption: Option<&str>,
        controls: Option<&Controls>,
    ) -> Result<SentMedia, ChannelError> {
        let reference = match &upload.source {
            MediaSource::File(path) => {
                let content = tokio::fs::read_to_string(path).await?;
                format!("ref-{content}")
            }
            MediaSource::Reference(r) => r.clone(),
        };
        let body = if caption.is_some() {
            BodyKind::Caption
        } else {
            BodyKind::None
        };
        let handle = self.handle(chat, body);
        self.sent.lock().unwrap().push(SentRecord::Media {
            chat: chat.to_string(),
            kind: upload.kind,
            source: upload.source.clone(),
            caption: caption.map(String::from),
            controls: controls.cloned(),
            silent: upload.silent,
            handle: handle.clone(),
        });
        Ok(SentMedia {
            handle,
            reference: Some(reference),
        })
    }

    async fn send_media_group(
        &self,
        chat: &ChatId,
        items: &[GroupItem],
    ) -> Result<Vec<MessageHandle>, ChannelError> {
        if self.group_fails.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed {
                name: "mock".into(),
                reason: "scripted group failure".into(),
            });
        }
        self.sent.lock().unwrap().push(SentRecord::Group {
            chat: chat.to_string(),
            items: items.to_vec(),
        });
        Ok(items
            .iter()
            .map(|i| {
                let body = if i.caption.is_some() {
                    BodyKind::Caption
                } else {
                    BodyKind::None
                };
                self.handle(chat, body)
            })
            .collect())
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        self.deleted.lock().unwrap().push(handle.clone());
        Ok(())
    }
}

#[async_trait]
impl ModeratorTransport for MockTransport {
    async fn send_decision_prompt(
        &self,
        chat: &ChatId,
        text: &str,
        controls: &Controls,
    ) -> Result<MessageHandle, ChannelError> {
        if self.prompt_fails.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed {
                name: "mock".into(),
                reason: "scripted prompt failure".into(),
            });
        }
        PublishTransport::send_text(self, chat, text, Some(controls)).await
    }

    async fn edit_prompt(
        &self,
        handle: &MessageHandle,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<(), ChannelError> {
        self.edits
            .lock()
            .unwrap()
            .push((handle.clone(), text.to_string(), controls.is_some()));
        Ok(())
    }

    async fn clear_controls(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        self.cleared.lock().unwrap().push(handle.clone());
        Ok(())
    }

    async fn answer_decision(&self, event_id: &str, notice: &str) -> Result<(), ChannelError> {
        self.answers
            .lock()
            .unwrap()
            .push((event_id.to_string(), notice.to_string()));
        Ok(())
    }
}

// ── Transformer ─────────────────────────────────────────────────────

/// Transformer that returns a fixed string and counts calls.
pub struct FixedTransformer {
    pub output: Mutex<String>,
    pub calls: AtomicI64,
}

impl FixedTransformer {
    pub fn new(output: &str) -> Arc<Self> {
        Arc::new(Self {
            output: Mutex::new(output.to_string()),
            calls: AtomicI64::new(0),
        })
    }

    pub fn set_output(&self, output: &str) {
        *self.output.lock().unwrap() = output.to_string();
    }

    pub fn calls(&self) -> i64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextTransformer for FixedTransformer {
    async fn transform(&self, _text: &str, _creativity: f32) -> Result<String, RewriteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.lock().unwrap().clone())
    }
}
