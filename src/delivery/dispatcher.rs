//! Delivery dispatcher: one state machine for text, single-media and album sends.
//!
//! Media is always moved through a transient local file: download with a
//! timeout, check the file is non-empty, upload with a timeout. The temp
//! directory is dropped at the end of every path.
//!
//! Albums are staged first: each item is uploaded silently to a staging
//! chat to obtain a durable provider reference, then the references are
//! sent as one group. Transient network failures are retried a bounded
//! number of times per item; items that still fail to stage are skipped.
//! If the group send fails the staged references are sent one by one. If
//! nothing at all could be staged, the text goes out alone. Staging
//! messages are deleted afterwards.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channels::{
    Controls, FeedSource, GroupItem, MediaUpload, MessageHandle, PublishTransport, SentMedia,
};
use crate::config::env_parse;
use crate::error::{ChannelError, ConfigError, DeliveryError};
use crate::pipeline::types::{ChatId, MediaItem, MediaKind, Post, PostShape};

/// Longest caption a media message accepts.
pub const CAPTION_LIMIT: usize = 1024;

/// Timeouts and limits for media delivery.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
    pub group_timeout: Duration,
    /// Pause between items when an album is sent one by one.
    pub item_delay: Duration,
    /// Media reported larger than this is skipped without downloading.
    pub max_file_size: u64,
    /// Extra attempts for an item after a transient network failure.
    pub transient_retries: u32,
    pub retry_delay: Duration,
    /// Where album items are staged. Defaults to the destination itself.
    pub staging_chat: Option<ChatId>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            download_timeout: Duration::from_secs(120),
            upload_timeout: Duration::from_secs(150),
            group_timeout: Duration::from_secs(180),
            item_delay: Duration::from_secs(1),
            // getFile refuses anything larger.
            max_file_size: 20 * 1024 * 1024,
            transient_retries: 2,
            retry_delay: Duration::from_secs(2),
            staging_chat: None,
        }
    }
}

impl DeliveryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            download_timeout: Duration::from_secs(env_parse(
                "DOWNLOAD_TIMEOUT",
                defaults.download_timeout.as_secs(),
            )?),
            upload_timeout: Duration::from_secs(env_parse(
                "UPLOAD_TIMEOUT",
                defaults.upload_timeout.as_secs(),
            )?),
            group_timeout: Duration::from_secs(env_parse(
                "MEDIA_GROUP_TIMEOUT",
                defaults.group_timeout.as_secs(),
            )?),
            item_delay: defaults.item_delay,
            max_file_size: env_parse("MAX_FILE_SIZE", defaults.max_file_size)?,
            transient_retries: env_parse("TRANSIENT_RETRIES", defaults.transient_retries)?,
            retry_delay: defaults.retry_delay,
            staging_chat: std::env::var("REPOSTER_STAGING_CHAT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| ChatId::new(s.trim())),
        })
    }
}

/// How a post actually went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Text,
    Media,
    Album,
    /// Group send failed; items went out one by one.
    AlbumIndividually,
    /// No media could be delivered; the text went out alone.
    TextFallback,
}

/// Result of a delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub outcome: DeliveryOutcome,
    /// Media items that reached the destination.
    pub delivered: usize,
    /// Media items dropped along the way.
    pub skipped: usize,
    /// Messages created at the destination.
    pub handles: Vec<MessageHandle>,
}

impl DeliveryReport {
    /// Whether the post went out in a reduced form.
    pub fn degraded(&self) -> bool {
        self.skipped > 0
            || matches!(
                self.outcome,
                DeliveryOutcome::AlbumIndividually | DeliveryOutcome::TextFallback
            )
    }
}

/// An album item uploaded to the staging chat.
#[derive(Debug, Clone)]
struct StagedItem {
    reference: String,
    kind: MediaKind,
    source_message_id: i64,
    sequence: usize,
    staging: MessageHandle,
}

/// Publishes posts through a [`PublishTransport`], pulling media from a [`FeedSource`].
pub struct DeliveryDispatcher {
    feed: Arc<dyn FeedSource>,
    transport: Arc<dyn PublishTransport>,
    config: DeliveryConfig,
}

impl DeliveryDispatcher {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        transport: Arc<dyn PublishTransport>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            feed,
            transport,
            config,
        }
    }

    /// Publish an approved post to `dest` with its publishable text.
    pub async fn publish(&self, post: &Post, dest: &ChatId) -> Result<DeliveryReport, DeliveryError> {
        let report = self.deliver(post, dest, post.publish_text(), None).await?;
        if report.degraded() {
            warn!(
                key = %post.key(),
                outcome = ?report.outcome,
                skipped = report.skipped,
                "Post delivered in degraded form"
            );
        } else {
            info!(key = %post.key(), outcome = ?report.outcome, dest = %dest, "Post delivered");
        }
        Ok(report)
    }

    /// Deliver `post`'s media with `text` to `dest`.
    ///
    /// `controls` are attached to the message carrying the text. For albums
    /// the group itself never carries controls.
    pub async fn deliver(
        &self,
        post: &Post,
        dest: &ChatId,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<DeliveryReport, DeliveryError> {
        match post.shape() {
            PostShape::Text => {
                if text.trim().is_empty() {
                    return Err(DeliveryError::Empty);
                }
                self.send_text(dest, text, controls, DeliveryOutcome::Text, 0)
                    .await
            }
            PostShape::SingleMedia => self.deliver_single(post, dest, text, controls).await,
            PostShape::Album => self.deliver_album(post, dest, text, controls).await,
        }
    }

    async fn deliver_single(
        &self,
        post: &Post,
        dest: &ChatId,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<DeliveryReport, DeliveryError> {
        let Some(media) = post.media.first() else {
            return self
                .send_text(dest, text, controls, DeliveryOutcome::TextFallback, 0)
                .await;
        };

        let (caption, overflow) = split_caption(text);
        let media_controls = if overflow { None } else { controls };

        match self
            .transfer(media, dest, caption, media_controls, false)
            .await
        {
            Ok(sent) => {
                let mut handles = vec![sent.handle];
                if overflow {
                    let follow_up = self
                        .send_text(dest, text, controls, DeliveryOutcome::Text, 0)
                        .await?;
                    handles.extend(follow_up.handles);
                }
                Ok(DeliveryReport {
                    outcome: DeliveryOutcome::Media,
                    delivered: 1,
                    skipped: 0,
                    handles,
                })
            }
            Err(e) => {
                warn!(
                    key = %post.key(),
                    kind = media.kind.label(),
                    error = %e,
                    "Media delivery failed, sending text only"
                );
                self.send_text(dest, text, controls, DeliveryOutcome::TextFallback, 1)
                    .await
            }
        }
    }

    async fn deliver_album(
        &self,
        post: &Post,
        dest: &ChatId,
        text: &str,
        controls: Option<&Controls>,
    ) -> Result<DeliveryReport, DeliveryError> {
        let staging_chat = self
            .config
            .staging_chat
            .clone()
            .unwrap_or_else(|| dest.clone());

        let (staged, mut skipped) = self.stage_items(post, &staging_chat).await;

        if staged.is_empty() {
            warn!(key = %post.key(), skipped, "No album item could be staged, sending text only");
            return self
                .send_text(dest, text, controls, DeliveryOutcome::TextFallback, skipped)
                .await;
        }

        let (caption, overflow) = split_caption(text);
        let items: Vec<GroupItem> = staged
            .iter()
            .enumerate()
            .map(|(i, item)| GroupItem {
                kind: item.kind.group_kind(),
                reference: item.reference.clone(),
                caption: if i == 0 { caption.map(String::from) } else { None },
            })
            .collect();

        let group = with_timeout(
            "media group",
            self.config.group_timeout,
            self.transport.send_media_group(dest, &items),
        )
        .await;

        let mut report = match group {
            Ok(handles) => DeliveryReport {
                outcome: DeliveryOutcome::Album,
                delivered: items.len(),
                skipped,
                handles,
            },
            Err(e) => {
                warn!(
                    key = %post.key(),
                    items = items.len(),
                    error = %e,
                    "Grouped send failed, sending items individually"
                );
                let (handles, failed) = self.send_individually(dest, &staged, caption).await;
                skipped += failed;
                DeliveryReport {
                    outcome: DeliveryOutcome::AlbumIndividually,
                    delivered: handles.len(),
                    skipped,
                    handles,
                }
            }
        };

        self.cleanup_staging(&staged).await;

        if report.delivered == 0 {
            warn!(key = %post.key(), "Album items all failed, sending text only");
            return self
                .send_text(dest, text, controls, DeliveryOutcome::TextFallback, skipped)
                .await;
        }

        if overflow {
            let follow_up = self
                .send_text(dest, text, None, DeliveryOutcome::Text, 0)
                .await?;
            report.handles.extend(follow_up.handles);
        }

        Ok(report)
    }

    /// Upload each album item to the staging chat. Returns staged items and the skip count.
    async fn stage_items(&self, post: &Post, staging_chat: &ChatId) -> (Vec<StagedItem>, usize) {
        let mut staged = Vec::with_capacity(post.media.len());
        let mut skipped = 0;

        for (sequence, media) in post.media.iter().enumerate() {
            match self.transfer(media, staging_chat, None, None, true).await {
                Ok(SentMedia {
                    handle,
                    reference: Some(reference),
                }) => {
                    debug!(
                        key = %post.key(),
                        sequence,
                        source_message_id = media.source_message_id,
                        "Album item staged"
                    );
                    staged.push(StagedItem {
                        reference,
                        kind: media.kind,
                        source_message_id: media.source_message_id,
                        sequence,
                        staging: handle,
                    });
                }
                Ok(SentMedia {
                    handle,
                    reference: None,
                }) => {
                    warn!(key = %post.key(), sequence, "Staged item has no reusable reference");
                    skipped += 1;
                    if let Err(e) = self.transport.delete_message(&handle).await {
                        debug!(error = %e, "Failed to remove unusable staging message");
                    }
                }
                Err(e) => {
                    warn!(
                        key = %post.key(),
                        sequence,
                        source_message_id = media.source_message_id,
                        error = %e,
                        "Album item skipped"
                    );
                    skipped += 1;
                }
            }
        }

        (staged, skipped)
    }

    /// Send staged references one at a time. Returns handles and the failure count.
    async fn send_individually(
        &self,
        dest: &ChatId,
        staged: &[StagedItem],
        caption: Option<&str>,
    ) -> (Vec<MessageHandle>, usize) {
        let mut handles = Vec::with_capacity(staged.len());
        let mut failed = 0;

        for (i, item) in staged.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.item_delay).await;
            }
            let upload = MediaUpload::reference(item.kind, item.reference.clone());
            let item_caption = if i == 0 { caption } else { None };
            match with_timeout(
                "upload",
                self.config.upload_timeout,
                self.transport.send_media(dest, &upload, item_caption, None),
            )
            .await
            {
                Ok(sent) => handles.push(sent.handle),
                Err(e) => {
                    warn!(
                        sequence = item.sequence,
                        source_message_id = item.source_message_id,
                        error = %e,
                        "Individual album item failed"
                    );
                    failed += 1;
                }
            }
        }

        (handles, failed)
    }

    async fn cleanup_staging(&self, staged: &[StagedItem]) {
        for item in staged {
            if let Err(e) = self.transport.delete_message(&item.staging).await {
                warn!(sequence = item.sequence, error = %e, "Failed to delete staging message");
            }
        }
    }

    /// Download one media item to a temp file and upload it to `chat`.
    ///
    /// Transient download failures are retried. Uploads are retried only
    /// when `silent`, i.e. for staging copies.
    async fn transfer(
        &self,
        media: &MediaItem,
        chat: &ChatId,
        caption: Option<&str>,
        controls: Option<&Controls>,
        silent: bool,
    ) -> Result<SentMedia, ChannelError> {
        let max = self.config.max_file_size;
        if let Some(size) = media.file_size.filter(|&size| size > max) {
            return Err(ChannelError::DownloadFailed {
                name: "delivery".into(),
                reason: format!("file is {size} bytes, limit is {max}"),
            });
        }

        let dir = tempfile::Builder::new().prefix("reposter-").tempdir()?;
        let path: PathBuf = dir.path().join(format!(
            "{}_{}.{}",
            media.kind.label(),
            media.source_message_id,
            media.kind.file_extension()
        ));

        self.retrying(media, "download", self.config.transient_retries, || {
            self.download_to(media, &path)
        })
        .await?;

        let mut upload = MediaUpload::file(media.kind, &path);
        if silent {
            upload = upload.silent();
        }
        let upload_retries = if silent { self.config.transient_retries } else { 0 };

        self.retrying(media, "upload", upload_retries, || {
            with_timeout(
                "upload",
                self.config.upload_timeout,
                self.transport.send_media(chat, &upload, caption, controls),
            )
        })
        .await
    }

    async fn download_to(&self, media: &MediaItem, path: &Path) -> Result<u64, ChannelError> {
        let bytes = with_timeout(
            "download",
            self.config.download_timeout,
            self.feed.download(media, path),
        )
        .await?;

        let on_disk = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        if bytes == 0 || on_disk == 0 {
            return Err(ChannelError::DownloadFailed {
                name: "delivery".into(),
                reason: "downloaded file is empty".into(),
            });
        }
        Ok(bytes)
    }

    /// Run `attempt` until it succeeds, fails permanently, or `retries` extra
    /// attempts after transient failures are used up.
    async fn retrying<T, F, Fut>(
        &self,
        media: &MediaItem,
        operation: &str,
        retries: u32,
        mut attempt: F,
    ) -> Result<T, ChannelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let mut failures = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_transient() && failures < retries => {
                    failures += 1;
                    warn!(
                        source_message_id = media.source_message_id,
                        operation,
                        attempt = failures,
                        error = %e,
                        "Transient media failure, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    async fn send_text(
        &self,
        dest: &ChatId,
        text: &str,
        controls: Option<&Controls>,
        outcome: DeliveryOutcome,
        skipped: usize,
    ) -> Result<DeliveryReport, DeliveryError> {
        let handle = self
            .transport
            .send_text(dest, text, controls)
            .await
            .map_err(|source| DeliveryError::Text {
                target: dest.to_string(),
                source,
            })?;
        Ok(DeliveryReport {
            outcome,
            delivered: 0,
            skipped,
            handles: vec![handle],
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Caption for a media message, and whether the text must follow separately.
fn split_caption(text: &str) -> (Option<&str>, bool) {
    if text.trim().is_empty() {
        (None, false)
    } else if text.chars().count() > CAPTION_LIMIT {
        (None, true)
    } else {
        (Some(text), false)
    }
}

async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T, ChannelError>>,
) -> Result<T, ChannelError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ChannelError::Timeout {
            operation: operation.to_string(),
            timeout: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MediaSource;
    use crate::pipeline::types::{ChannelPair, RawItem};
    use crate::testing::{MockFeed, MockTransport, SentRecord};

    fn fast_config() -> DeliveryConfig {
        DeliveryConfig {
            download_timeout: Duration::from_millis(100),
            upload_timeout: Duration::from_millis(100),
            group_timeout: Duration::from_millis(100),
            item_delay: Duration::from_millis(1),
            max_file_size: 1024,
            transient_retries: 2,
            retry_delay: Duration::from_millis(1),
            staging_chat: Some(ChatId::new("staging")),
        }
    }

    fn album(n: i64) -> Post {
        let pair = ChannelPair::new("@src", "@dst");
        let mut post = Post::standalone(&pair, &RawItem::text(1, "caption"), "caption".into());
        post.item_ids = (1..=n).collect();
        post.media = (1..=n)
            .map(|i| MediaItem::new(MediaKind::Photo, format!("file-{i}"), i))
            .collect();
        post
    }

    fn dispatcher(feed: Arc<MockFeed>, transport: Arc<MockTransport>) -> DeliveryDispatcher {
        DeliveryDispatcher::new(feed, transport, fast_config())
    }

    #[tokio::test]
    async fn text_post_is_sent_as_text() {
        let feed = MockFeed::new();
        let transport = MockTransport::new();
        let pair = ChannelPair::new("@src", "@dst");
        let post = Post::standalone(&pair, &RawItem::text(5, "hello"), "hello".into());

        let report = dispatcher(feed, transport.clone())
            .publish(&post, &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::Text);
        assert!(!report.degraded());
        assert_eq!(transport.texts("@dst"), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn text_failure_propagates() {
        let feed = MockFeed::new();
        let transport = MockTransport::new();
        transport.fail_text(true);
        let pair = ChannelPair::new("@src", "@dst");
        let post = Post::standalone(&pair, &RawItem::text(5, "hello"), "hello".into());

        let err = dispatcher(feed, transport)
            .publish(&post, &ChatId::new("@dst"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Text { .. }));
    }

    #[tokio::test]
    async fn single_media_uploads_file_with_caption() {
        let feed = MockFeed::new();
        let transport = MockTransport::new();
        let pair = ChannelPair::new("@src", "@dst");
        let post = Post::standalone(&pair, &RawItem::media(3, MediaKind::Video, "vid"), "text".into());

        let report = dispatcher(feed, transport.clone())
            .publish(&post, &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::Media);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            SentRecord::Media {
                chat,
                kind,
                source,
                caption,
                ..
            } => {
                assert_eq!(chat, "@dst");
                assert_eq!(*kind, MediaKind::Video);
                assert!(matches!(source, MediaSource::File(_)));
                assert_eq!(caption.as_deref(), Some("text"));
            }
            other => panic!("unexpected send {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_media_download_failure_falls_back_to_text() {
        let feed = MockFeed::new();
        feed.fail_download("vid");
        let transport = MockTransport::new();
        let pair = ChannelPair::new("@src", "@dst");
        let post = Post::standalone(&pair, &RawItem::media(3, MediaKind::Video, "vid"), "text".into());

        let report = dispatcher(feed, transport.clone())
            .publish(&post, &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::TextFallback);
        assert!(report.degraded());
        assert_eq!(transport.texts("@dst"), vec!["text".to_string()]);
    }

    #[tokio::test]
    async fn empty_download_is_a_failure() {
        let feed = MockFeed::new();
        feed.empty_download("vid");
        let transport = MockTransport::new();
        let pair = ChannelPair::new("@src", "@dst");
        let post = Post::standalone(&pair, &RawItem::media(3, MediaKind::Photo, "vid"), "text".into());

        let report = dispatcher(feed, transport)
            .publish(&post, &ChatId::new("@dst"))
            .await
            .unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::TextFallback);
    }

    #[tokio::test]
    async fn oversize_media_is_skipped_before_download() {
        let feed = MockFeed::new();
        let transport = MockTransport::new();
        let pair = ChannelPair::new("@src", "@dst");
        let mut post = Post::standalone(&pair, &RawItem::media(3, MediaKind::Photo, "big"), "text".into());
        post.media[0] = post.media[0].clone().with_size(4096);

        let report = dispatcher(feed.clone(), transport)
            .publish(&post, &ChatId::new("@dst"))
            .await
            .unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::TextFallback);
        assert!(feed.downloads().is_empty());
    }

    #[tokio::test]
    async fn album_with_one_timed_out_item_sends_remaining_four() {
        let feed = MockFeed::new();
        feed.slow_download("file-3", Duration::from_millis(500));
        let transport = MockTransport::new();

        let report = dispatcher(feed, transport.clone())
            .publish(&album(5), &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::Album);
        assert_eq!(report.delivered, 4);
        assert_eq!(report.skipped, 1);

        let groups = transport.groups("@dst");
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.len(), 4);
        assert_eq!(group[0].caption.as_deref(), Some("caption"));
        assert!(group[1..].iter().all(|i| i.caption.is_none()));
        assert_eq!(
            group.iter().map(|i| i.reference.as_str()).collect::<Vec<_>>(),
            vec!["ref-file-1", "ref-file-2", "ref-file-4", "ref-file-5"]
        );

        // Staging uploads land in the staging chat, silently, and are removed.
        assert_eq!(transport.media_count("staging"), 4);
        assert_eq!(transport.deleted().len(), 4);
    }

    #[tokio::test]
    async fn album_item_timing_out_once_is_retried() {
        let feed = MockFeed::new();
        feed.slow_first_download("file-3", Duration::from_millis(500));
        let transport = MockTransport::new();

        let report = dispatcher(feed.clone(), transport.clone())
            .publish(&album(5), &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::Album);
        assert_eq!(report.delivered, 5);
        assert_eq!(report.skipped, 0);
        assert!(!report.degraded());
        assert_eq!(feed.download_attempts("file-3"), 2);
        assert_eq!(feed.download_attempts("file-1"), 1);
        assert_eq!(transport.groups("@dst")[0].len(), 5);
    }

    #[tokio::test]
    async fn persistent_timeouts_stop_after_bounded_retries() {
        let feed = MockFeed::new();
        feed.slow_download("file-2", Duration::from_millis(500));
        let transport = MockTransport::new();

        let report = dispatcher(feed.clone(), transport)
            .publish(&album(3), &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(feed.download_attempts("file-2"), 3);
    }

    #[tokio::test]
    async fn permanent_download_failure_is_not_retried() {
        let feed = MockFeed::new();
        feed.fail_download("file-1");
        let transport = MockTransport::new();

        let report = dispatcher(feed.clone(), transport)
            .publish(&album(2), &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(feed.download_attempts("file-1"), 1);
    }

    #[tokio::test]
    async fn album_group_failure_sends_items_individually() {
        let feed = MockFeed::new();
        let transport = MockTransport::new();
        transport.fail_group(true);

        let report = dispatcher(feed, transport.clone())
            .publish(&album(3), &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::AlbumIndividually);
        assert_eq!(report.delivered, 3);
        assert!(report.degraded());

        let sent = transport.media_to("@dst");
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(source, _)| matches!(source, MediaSource::Reference(_))));
        assert_eq!(sent[0].1.as_deref(), Some("caption"));
        assert!(sent[1].1.is_none());
    }

    #[tokio::test]
    async fn album_with_nothing_staged_falls_back_to_text() {
        let feed = MockFeed::new();
        for i in 1..=3 {
            feed.fail_download(&format!("file-{i}"));
        }
        let transport = MockTransport::new();

        let report = dispatcher(feed, transport.clone())
            .publish(&album(3), &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::TextFallback);
        assert_eq!(report.skipped, 3);
        assert_eq!(transport.texts("@dst"), vec!["caption".to_string()]);
        assert!(transport.groups("@dst").is_empty());
    }

    #[tokio::test]
    async fn animation_goes_into_group_as_document() {
        let feed = MockFeed::new();
        let transport = MockTransport::new();
        let mut post = album(2);
        post.media[1].kind = MediaKind::Animation;

        dispatcher(feed, transport.clone())
            .publish(&post, &ChatId::new("@dst"))
            .await
            .unwrap();

        let groups = transport.groups("@dst");
        assert_eq!(groups[0][1].kind, MediaKind::Document);
    }

    #[tokio::test]
    async fn long_caption_is_sent_after_media() {
        let feed = MockFeed::new();
        let transport = MockTransport::new();
        let pair = ChannelPair::new("@src", "@dst");
        let long = "д".repeat(CAPTION_LIMIT + 1);
        let post = Post::standalone(&pair, &RawItem::media(3, MediaKind::Photo, "p"), long.clone());

        let report = dispatcher(feed, transport.clone())
            .publish(&post, &ChatId::new("@dst"))
            .await
            .unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::Media);
        assert_eq!(report.handles.len(), 2);
        let media = transport.media_to("@dst");
        assert!(media[0].1.is_none());
        assert_eq!(transport.texts("@dst"), vec![long]);
    }
}
