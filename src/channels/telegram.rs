//! Telegram transport: Bot API client for the feed, publish and moderator surfaces.
//!
//! One [`TelegramBot`] serves all three roles: it uploads and forwards
//! media to target channels, posts decision prompts with inline buttons
//! to the moderator chat, and downloads source files. Channel posts and
//! button presses arrive through [`spawn_update_listener`].

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;

use crate::channels::{
    BodyKind, ChannelPostBuffer, Controls, DecisionStream, GroupItem, MediaFetcher, MediaSource,
    MediaUpload, MessageHandle, ModeratorTransport, PublishTransport, SentMedia,
};
use crate::error::ChannelError;
use crate::moderation::{DecisionAction, DecisionEvent};
use crate::pipeline::types::{ChatId, MediaItem, MediaKind, RawItem};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Maximum caption length for media messages.
const TELEGRAM_MAX_CAPTION_LENGTH: usize = 1024;

/// Maximum length of a callback answer notice.
const TELEGRAM_MAX_ANSWER_LENGTH: usize = 200;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout for getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const CHANNEL_NAME: &str = "telegram";

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API client.
pub struct TelegramBot {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramBot {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at another Bot API server (self-hosted or test).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{file_path}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Call a Bot API method with a JSON body, returning its `result`.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))?;
        read_response(method, resp).await
    }

    /// Call a Bot API method with a multipart body.
    async fn call_multipart(&self, method: &str, form: Form) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))?;
        read_response(method, resp).await
    }

    /// Verify the token. Returns the bot's username.
    pub async fn health_check(&self) -> Result<String, ChannelError> {
        let me = self
            .call("getMe", &json!({}))
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;
        Ok(me
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    /// Long-poll for channel posts and callback queries.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Value>, ChannelError> {
        let body = json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["channel_post", "edited_channel_post", "callback_query"]
        });
        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("getUpdates: {e}")))?;
        let result = read_response("getUpdates", resp).await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }

    /// Send a text message, trying Markdown first with plain text fallback.
    /// Splits long messages; controls go on the last chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<i64, ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        let mut last_id = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { controls } else { None };
            last_id = self.send_message_chunk(chat_id, chunk, markup).await?;
        }
        Ok(last_id)
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<i64, ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(controls) = controls {
            body["reply_markup"] = reply_markup(controls);
        }

        let markdown_err = match self.call("sendMessage", &body).await {
            Ok(message) => return message_id(&message),
            Err(e @ ChannelError::SendFailed { .. }) => e,
            Err(e) => return Err(e),
        };
        tracing::warn!(
            error = %markdown_err,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        if let Some(obj) = body.as_object_mut() {
            obj.remove("parse_mode");
        }
        let message = self.call("sendMessage", &body).await?;
        message_id(&message)
    }

    async fn edit(&self, method: &str, body: Value) -> Result<(), ChannelError> {
        match self.call(method, &body).await {
            Ok(_) => Ok(()),
            Err(ChannelError::SendFailed { reason, .. })
                if reason.contains("message is not modified") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

async fn read_response(method: &str, resp: reqwest::Response) -> Result<Value, ChannelError> {
    let status = resp.status();
    let data: ApiResponse = resp
        .json()
        .await
        .map_err(|e| ChannelError::InvalidMessage(format!("{method}: {e}")))?;

    if data.ok {
        return Ok(data.result);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ChannelError::RateLimited {
            name: CHANNEL_NAME.into(),
        });
    }
    Err(ChannelError::SendFailed {
        name: CHANNEL_NAME.into(),
        reason: format!(
            "{method} failed ({status}): {}",
            data.description.unwrap_or_default()
        ),
    })
}

// ── Publish surface ────────────────────────────────────────────────

#[async_trait]
impl PublishTransport for TelegramBot {
    async fn send_text(
        &self,
        chat: &ChatId,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<MessageHandle, ChannelError> {
        let id = self.send_message(chat.as_str(), text, controls).await?;
        Ok(MessageHandle::new(chat.clone(), id, BodyKind::Text))
    }

    async fn send_media(
        &self,
        chat: &ChatId,
        upload: &MediaUpload,
        caption: Option<&str>,
        controls: Option<&Controls>,
    ) -> Result<SentMedia, ChannelError> {
        let (method, field) = media_method(upload.kind);
        let caption = caption
            .filter(|c| !c.trim().is_empty())
            .map(|c| truncate_chars(c, TELEGRAM_MAX_CAPTION_LENGTH));

        let message = match &upload.source {
            MediaSource::File(path) => {
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from)
                    .unwrap_or_else(|| format!("media.{}", upload.kind.file_extension()));
                let file_bytes = tokio::fs::read(path).await?;
                let part = Part::bytes(file_bytes).file_name(file_name);

                let mut form = Form::new()
                    .text("chat_id", chat.to_string())
                    .part(field, part);
                if let Some(cap) = &caption {
                    form = form.text("caption", cap.clone());
                }
                if let Some(controls) = controls {
                    form = form.text("reply_markup", reply_markup(controls).to_string());
                }
                if upload.silent {
                    form = form.text("disable_notification", "true");
                }
                self.call_multipart(method, form).await?
            }
            MediaSource::Reference(reference) => {
                let mut body = json!({ "chat_id": chat.as_str() });
                body[field] = Value::String(reference.clone());
                if let Some(cap) = &caption {
                    body["caption"] = Value::String(cap.clone());
                }
                if let Some(controls) = controls {
                    body["reply_markup"] = reply_markup(controls);
                }
                if upload.silent {
                    body["disable_notification"] = Value::Bool(true);
                }
                self.call(method, &body).await?
            }
        };

        let body = if caption.is_some() {
            BodyKind::Caption
        } else {
            BodyKind::None
        };
        let handle = MessageHandle::new(chat.clone(), message_id(&message)?, body);
        tracing::debug!(chat = %chat, method, message_id = handle.message_id, "Telegram media sent");
        Ok(SentMedia {
            handle,
            reference: sent_file_ref(&message, upload.kind),
        })
    }

    async fn send_media_group(
        &self,
        chat: &ChatId,
        items: &[GroupItem],
    ) -> Result<Vec<MessageHandle>, ChannelError> {
        let media: Vec<Value> = items
            .iter()
            .map(|item| {
                let mut entry = json!({
                    "type": group_type(item.kind),
                    "media": item.reference,
                });
                if let Some(cap) = item.caption.as_deref().filter(|c| !c.trim().is_empty()) {
                    entry["caption"] = Value::String(truncate_chars(cap, TELEGRAM_MAX_CAPTION_LENGTH));
                }
                entry
            })
            .collect();

        let result = self
            .call(
                "sendMediaGroup",
                &json!({ "chat_id": chat.as_str(), "media": media }),
            )
            .await?;

        let messages = result.as_array().cloned().unwrap_or_default();
        messages
            .iter()
            .map(|m| {
                let body = if m.get("caption").is_some() {
                    BodyKind::Caption
                } else {
                    BodyKind::None
                };
                Ok(MessageHandle::new(chat.clone(), message_id(m)?, body))
            })
            .collect()
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        self.call(
            "deleteMessage",
            &json!({
                "chat_id": handle.chat.as_str(),
                "message_id": handle.message_id,
            }),
        )
        .await
        .map(|_| ())
    }
}

// ── Moderator surface ──────────────────────────────────────────────

#[async_trait]
impl ModeratorTransport for TelegramBot {
    async fn send_decision_prompt(
        &self,
        chat: &ChatId,
        text: &str,
        controls: &Controls,
    ) -> Result<MessageHandle, ChannelError> {
        PublishTransport::send_text(self, chat, text, Some(controls)).await
    }

    async fn edit_prompt(
        &self,
        handle: &MessageHandle,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<(), ChannelError> {
        let markup = controls.map(reply_markup).unwrap_or_else(empty_markup);
        let mut body = json!({
            "chat_id": handle.chat.as_str(),
            "message_id": handle.message_id,
            "reply_markup": markup,
        });

        let method = match handle.body {
            BodyKind::Text => {
                body["text"] = Value::String(truncate_chars(text, TELEGRAM_MAX_MESSAGE_LENGTH));
                "editMessageText"
            }
            BodyKind::Caption => {
                body["caption"] = Value::String(truncate_chars(text, TELEGRAM_MAX_CAPTION_LENGTH));
                "editMessageCaption"
            }
            BodyKind::None => "editMessageReplyMarkup",
        };
        self.edit(method, body).await
    }

    async fn clear_controls(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        self.edit(
            "editMessageReplyMarkup",
            json!({
                "chat_id": handle.chat.as_str(),
                "message_id": handle.message_id,
                "reply_markup": empty_markup(),
            }),
        )
        .await
    }

    async fn answer_decision(&self, event_id: &str, notice: &str) -> Result<(), ChannelError> {
        self.call(
            "answerCallbackQuery",
            &json!({
                "callback_query_id": event_id,
                "text": truncate_chars(notice, TELEGRAM_MAX_ANSWER_LENGTH),
            }),
        )
        .await
        .map(|_| ())
    }
}

// ── Media download ─────────────────────────────────────────────────

#[async_trait]
impl MediaFetcher for TelegramBot {
    async fn fetch_file(&self, file_ref: &str, dest: &Path) -> Result<u64, ChannelError> {
        let download_failed = |reason: String| ChannelError::DownloadFailed {
            name: CHANNEL_NAME.into(),
            reason,
        };

        let file = self
            .call("getFile", &json!({ "file_id": file_ref }))
            .await
            .map_err(|e| download_failed(e.to_string()))?;
        let file_path = file
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| download_failed("getFile returned no file_path".into()))?;

        let mut resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| download_failed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(download_failed(format!("file fetch returned {}", resp.status())));
        }

        let mut out = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| download_failed(e.to_string()))?
        {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;

        tracing::debug!(bytes = written, "Telegram file downloaded");
        Ok(written)
    }
}

// ── Update listener ────────────────────────────────────────────────

/// Poll for updates until `shutdown` is set.
///
/// Channel posts go into `buffer`; button presses from allowed
/// moderators come out of the returned stream. Presses from anyone else
/// are answered and dropped.
pub fn spawn_update_listener(
    bot: Arc<TelegramBot>,
    buffer: Arc<ChannelPostBuffer>,
    allowed_moderators: Vec<String>,
    shutdown: Arc<AtomicBool>,
) -> DecisionStream {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut offset: i64 = 0;

        tracing::info!("Telegram listener polling for channel posts and decisions...");

        while !shutdown.load(Ordering::Relaxed) {
            let updates = match bot.get_updates(offset).await {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!(error = %e, "Telegram poll error");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                // Advance offset past this update
                if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                    offset = uid + 1;
                }

                let post = update
                    .get("channel_post")
                    .or_else(|| update.get("edited_channel_post"));
                if let Some(post) = post {
                    match parse_channel_post(post) {
                        Some(parsed) => {
                            buffer
                                .push(&parsed.chat_id, parsed.username.as_deref(), parsed.item)
                                .await;
                        }
                        None => tracing::debug!("Telegram: unparseable channel post"),
                    }
                    continue;
                }

                let Some(query) = update.get("callback_query") else {
                    continue;
                };
                let Some(parsed) = parse_callback_query(query) else {
                    tracing::debug!("Telegram: ignoring callback with unknown payload");
                    continue;
                };

                let identities = parsed.identities.iter().map(String::as_str);
                if !check_user_allowed(&allowed_moderators, identities) {
                    tracing::warn!(
                        user = parsed.event.user.as_deref().unwrap_or("unknown"),
                        "Telegram: ignoring decision from unauthorized user"
                    );
                    if let Err(e) = bot
                        .answer_decision(&parsed.event.event_id, "⛔ Not authorized")
                        .await
                    {
                        tracing::debug!(error = %e, "Failed to answer unauthorized decision");
                    }
                    continue;
                }

                if tx.send(parsed.event).is_err() {
                    tracing::info!("Telegram listener channel closed");
                    return;
                }
            }
        }

        tracing::info!("Telegram listener stopped");
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    });

    Box::pin(stream)
}

// ── Parsing ─────────────────────────────────────────────────────────

/// A channel post as it arrived on the update stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPost {
    pub chat_id: String,
    pub username: Option<String>,
    pub item: RawItem,
}

/// A button press with the identities it can be authorised by.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCallback {
    pub event: DecisionEvent,
    /// Numeric user id and username, when present.
    pub identities: Vec<String>,
}

/// Convert a Bot API `Message` from a channel into a feed item.
pub fn parse_channel_post(message: &Value) -> Option<ChannelPost> {
    let id = message.get("message_id").and_then(Value::as_i64)?;
    let chat = message.get("chat")?;
    let chat_id = chat.get("id").and_then(Value::as_i64)?.to_string();
    let username = chat
        .get("username")
        .and_then(Value::as_str)
        .map(String::from);

    let timestamp = message
        .get("date")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    let item = RawItem {
        id,
        text: str_field(message, "text"),
        caption: str_field(message, "caption"),
        media: parse_media(message, id),
        group_id: str_field(message, "media_group_id"),
        timestamp,
    };

    Some(ChannelPost {
        chat_id,
        username,
        item,
    })
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

/// Resolve the attachment kind. Animations also carry a `document`
/// field, so they are checked first.
fn parse_media(message: &Value, message_id: i64) -> Option<MediaItem> {
    let (kind, file) = if let Some(sizes) = message.get("photo").and_then(Value::as_array) {
        (MediaKind::Photo, sizes.last()?)
    } else if let Some(video) = message.get("video") {
        (MediaKind::Video, video)
    } else if let Some(animation) = message.get("animation") {
        (MediaKind::Animation, animation)
    } else if let Some(document) = message.get("document") {
        (MediaKind::Document, document)
    } else {
        return None;
    };

    let file_id = file.get("file_id").and_then(Value::as_str)?;
    let mut media = MediaItem::new(kind, file_id, message_id);
    if let Some(size) = file.get("file_size").and_then(Value::as_u64) {
        media = media.with_size(size);
    }
    Some(media)
}

/// Convert a Bot API `CallbackQuery` into a decision event.
pub fn parse_callback_query(query: &Value) -> Option<ParsedCallback> {
    let event_id = query.get("id").and_then(Value::as_str)?.to_string();
    let data = query.get("data").and_then(Value::as_str)?;
    let (action, token) = DecisionAction::parse_callback(data)?;

    let from = query.get("from");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string());
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .map(String::from);

    let origin = query.get("message").and_then(|m| {
        let chat_id = m.get("chat")?.get("id")?.as_i64()?;
        let message_id = m.get("message_id")?.as_i64()?;
        let body = if m.get("text").is_some() {
            BodyKind::Text
        } else if m.get("caption").is_some() {
            BodyKind::Caption
        } else {
            BodyKind::None
        };
        Some(MessageHandle::new(
            ChatId::new(chat_id.to_string()),
            message_id,
            body,
        ))
    });

    let identities: Vec<String> = username.iter().chain(user_id.iter()).cloned().collect();
    let user = username.clone().or_else(|| user_id.clone());

    Some(ParsedCallback {
        event: DecisionEvent {
            event_id,
            action,
            token,
            origin,
            user,
        },
        identities,
    })
}

// ── Helpers ─────────────────────────────────────────────────────────

fn media_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Photo => ("sendPhoto", "photo"),
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Document => ("sendDocument", "document"),
        MediaKind::Animation => ("sendAnimation", "animation"),
    }
}

fn group_type(kind: MediaKind) -> &'static str {
    match kind.group_kind() {
        MediaKind::Photo => "photo",
        MediaKind::Video => "video",
        MediaKind::Document | MediaKind::Animation => "document",
    }
}

fn message_id(message: &Value) -> Result<i64, ChannelError> {
    message
        .get("message_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ChannelError::InvalidMessage("response has no message_id".into()))
}

/// Durable file reference of media we just sent.
fn sent_file_ref(message: &Value, kind: MediaKind) -> Option<String> {
    let file = match kind {
        MediaKind::Photo => message.get("photo").and_then(Value::as_array)?.last()?,
        MediaKind::Video => message.get("video")?,
        MediaKind::Animation => message
            .get("animation")
            .or_else(|| message.get("document"))?,
        MediaKind::Document => message.get("document")?,
    };
    file.get("file_id").and_then(Value::as_str).map(String::from)
}

fn reply_markup(controls: &Controls) -> Value {
    let rows: Vec<Vec<Value>> = controls
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.label, "callback_data": b.data }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn empty_markup() -> Value {
    json!({ "inline_keyboard": [] })
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.trim_start_matches('@')))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        // Find a good split point
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
