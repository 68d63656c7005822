//! Moderator notifier: shows pending posts and keeps their prompts current.

use std::sync::Arc;

use tracing::debug;

use crate::channels::{BodyKind, MessageHandle, ModeratorTransport};
use crate::delivery::{CAPTION_LIMIT, DeliveryDispatcher};
use crate::error::{ChannelError, DeliveryError};
use crate::pipeline::types::{ChatId, Post, PostShape};

use super::model::PendingEntry;
use super::render;

/// Messages that make up a moderator prompt.
#[derive(Debug, Clone)]
pub struct PromptRef {
    /// Message carrying the controls.
    pub prompt: MessageHandle,
    /// Other preview messages (album media, overflow text).
    pub previews: Vec<MessageHandle>,
}

/// Sends and maintains moderator prompts in one moderator chat.
pub struct ModeratorNotifier {
    transport: Arc<dyn ModeratorTransport>,
    dispatcher: Arc<DeliveryDispatcher>,
    chat: ChatId,
}

impl ModeratorNotifier {
    pub fn new(
        transport: Arc<dyn ModeratorTransport>,
        dispatcher: Arc<DeliveryDispatcher>,
        chat: ChatId,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            chat,
        }
    }

    pub fn chat(&self) -> &ChatId {
        &self.chat
    }

    /// Send the prompt for a freshly queued post.
    pub async fn present(&self, post: &Post, token: &str) -> Result<PromptRef, ChannelError> {
        let controls = render::controls(post, token);

        match post.shape() {
            PostShape::Text => {
                let prompt = self
                    .transport
                    .send_decision_prompt(&self.chat, &render::prompt_text(post), &controls)
                    .await?;
                Ok(PromptRef {
                    prompt,
                    previews: Vec::new(),
                })
            }
            PostShape::SingleMedia => {
                let report = self
                    .dispatcher
                    .deliver(post, &self.chat, &render::prompt_text(post), Some(&controls))
                    .await
                    .map_err(into_channel_error)?;
                let mut handles = report.handles;
                let prompt = handles.pop().ok_or_else(|| {
                    ChannelError::InvalidMessage("media prompt produced no message".into())
                })?;
                Ok(PromptRef {
                    prompt,
                    previews: handles,
                })
            }
            PostShape::Album => {
                let report = self
                    .dispatcher
                    .deliver(post, &self.chat, post.publish_text(), None)
                    .await
                    .map_err(into_channel_error)?;
                debug!(
                    key = %post.key(),
                    delivered = report.delivered,
                    skipped = report.skipped,
                    "Album preview sent"
                );
                let prompt = self
                    .transport
                    .send_decision_prompt(&self.chat, &render::album_control_text(post), &controls)
                    .await?;
                Ok(PromptRef {
                    prompt,
                    previews: report.handles,
                })
            }
        }
    }

    /// Re-render the prompt after the post changed.
    pub async fn refresh(&self, entry: &PendingEntry) -> Result<(), ChannelError> {
        let Some(prompt) = &entry.prompt else {
            return Ok(());
        };
        let text = if entry.post.is_album() {
            render::album_control_text(&entry.post)
        } else {
            render::prompt_text(&entry.post)
        };
        let controls = render::controls(&entry.post, &entry.token);
        self.transport
            .edit_prompt(prompt, &fit_body(prompt, &text), Some(&controls))
            .await?;

        if !entry.post.is_album() {
            return Ok(());
        }
        // Album previews carry the text themselves, as a caption or a follow-up.
        let body = entry.post.publish_text();
        for preview in &entry.previews {
            if preview.body == BodyKind::None {
                continue;
            }
            if let Err(e) = self
                .transport
                .edit_prompt(preview, &fit_body(preview, body), None)
                .await
            {
                debug!(key = %entry.post.key(), error = %e, "Failed to refresh preview text");
            }
        }
        Ok(())
    }

    /// Replace the prompt with a final status line and drop its controls.
    pub async fn finalize(&self, entry: &PendingEntry, status: &str) -> Result<(), ChannelError> {
        let Some(prompt) = &entry.prompt else {
            return Ok(());
        };
        self.transport
            .edit_prompt(prompt, &fit_body(prompt, status), None)
            .await
    }

    pub async fn clear_controls(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        self.transport.clear_controls(handle).await
    }
}

/// Trim `text` to what the handle's body can hold.
fn fit_body(handle: &MessageHandle, text: &str) -> String {
    match handle.body {
        BodyKind::Caption if text.chars().count() > CAPTION_LIMIT => {
            let mut cut: String = text.chars().take(CAPTION_LIMIT - 1).collect();
            cut.push('…');
            cut
        }
        _ => text.to_string(),
    }
}

fn into_channel_error(e: DeliveryError) -> ChannelError {
    match e {
        DeliveryError::Text { source, .. } => source,
        DeliveryError::Empty => ChannelError::InvalidMessage(DeliveryError::Empty.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_bodies_are_trimmed() {
        let handle = MessageHandle::new(ChatId::new("m"), 1, BodyKind::Caption);
        let long = "x".repeat(CAPTION_LIMIT + 50);
        let fitted = fit_body(&handle, &long);
        assert_eq!(fitted.chars().count(), CAPTION_LIMIT);
        assert!(fitted.ends_with('…'));

        let text_handle = MessageHandle::new(ChatId::new("m"), 1, BodyKind::Text);
        assert_eq!(fit_body(&text_handle, &long), long);
    }
}
