//! Feed scanner: finds the newest unseen post of a source.

use std::sync::Arc;

use tracing::{debug, info};

use crate::channels::FeedSource;
use crate::error::PipelineError;
use crate::store::Ledger;

use super::album;
use super::types::{ChannelPair, Post};

/// Items fetched per scan, enough to cover a full album.
pub const FETCH_LIMIT: usize = 10;

/// Polls sources for their latest post and filters out what the ledger has seen.
pub struct FeedScanner {
    feed: Arc<dyn FeedSource>,
    ledger: Arc<Ledger>,
}

impl FeedScanner {
    pub fn new(feed: Arc<dyn FeedSource>, ledger: Arc<Ledger>) -> Self {
        Self { feed, ledger }
    }

    /// The newest post of `pair.source`, if it has text and has not been processed.
    pub async fn fetch_latest(&self, pair: &ChannelPair) -> Result<Option<Post>, PipelineError> {
        let items = self
            .feed
            .fetch_recent(&pair.source, FETCH_LIMIT)
            .await
            .map_err(|e| PipelineError::Fetch {
                source_id: pair.source.to_string(),
                reason: e.to_string(),
            })?;

        let Some(newest) = items.first() else {
            debug!(source = %pair.source, "No messages in source");
            return Ok(None);
        };

        let post = match &newest.group_id {
            Some(group_id) => {
                let members = album::members(&items, group_id);
                debug!(
                    source = %pair.source,
                    group = %group_id,
                    items = members.len(),
                    "Newest message is part of an album"
                );
                album::assemble(pair, members)
            }
            None => {
                if newest.media.is_none() && newest.text.is_none() {
                    debug!(source = %pair.source, id = newest.id, "Skipped: no text and no media");
                    return Ok(None);
                }
                match newest.body() {
                    Some(text) => Some(Post::standalone(pair, newest, text.to_string())),
                    None => {
                        debug!(source = %pair.source, id = newest.id, "Skipped: no text");
                        None
                    }
                }
            }
        };

        let Some(post) = post else {
            return Ok(None);
        };

        if self.ledger.is_processed(&post.key()).await {
            debug!(key = %post.key(), "Already processed");
            return Ok(None);
        }

        info!(
            key = %post.key(),
            items = post.item_count(),
            album = post.is_album(),
            "New post found"
        );
        Ok(Some(post))
    }
}
