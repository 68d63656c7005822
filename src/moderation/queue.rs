//! Moderation queue: in-memory table of posts awaiting a decision.
//!
//! Each pending post lives in its own slot behind an async mutex, so
//! decisions on one post are serialised while different posts proceed
//! independently. Approve and reject take the entry out of its slot; a
//! decision that finds the slot empty reports [`ModerationError::Stale`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::delivery::{DeliveryDispatcher, DeliveryReport};
use crate::error::{ModerationError, RewriteError};
use crate::pipeline::types::{Post, PostKey};
use crate::rewrite::RewriteEngine;
use crate::store::Ledger;

use super::model::{PendingEntry, callback_token};
use super::notify::ModeratorNotifier;
use super::render;

/// Default lifetime of a pending entry.
pub const DEFAULT_PENDING_TTL_HOURS: i64 = 24;

/// Result of a successful decision.
#[derive(Debug, Clone)]
pub enum DecisionOutcome {
    Approved(DeliveryReport),
    Rejected,
    Regenerated { count: u32 },
}

struct Slot {
    created_at: DateTime<Utc>,
    cell: Mutex<Option<PendingEntry>>,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<PostKey, Arc<Slot>>,
    tokens: HashMap<String, PostKey>,
}

/// Pending-approval state machine.
pub struct ModerationQueue {
    inner: RwLock<Inner>,
    notifier: ModeratorNotifier,
    dispatcher: Arc<DeliveryDispatcher>,
    engine: Arc<RewriteEngine>,
    ledger: Arc<Ledger>,
    ttl: chrono::Duration,
}

impl ModerationQueue {
    pub fn new(
        notifier: ModeratorNotifier,
        dispatcher: Arc<DeliveryDispatcher>,
        engine: Arc<RewriteEngine>,
        ledger: Arc<Ledger>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner::default()),
            notifier,
            dispatcher,
            engine,
            ledger,
            ttl: chrono::Duration::hours(DEFAULT_PENDING_TTL_HOURS),
        })
    }

    /// Override the pending-entry lifetime.
    pub fn with_ttl(
        notifier: ModeratorNotifier,
        dispatcher: Arc<DeliveryDispatcher>,
        engine: Arc<RewriteEngine>,
        ledger: Arc<Ledger>,
        ttl: chrono::Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner::default()),
            notifier,
            dispatcher,
            engine,
            ledger,
            ttl,
        })
    }

    /// Queue a rewritten post and show it to the moderator. Returns its callback token.
    pub async fn enqueue(&self, post: Post) -> Result<String, ModerationError> {
        let key = post.key();
        if post.rewritten_text.is_none() {
            return Err(ModerationError::NotRewritten {
                key: key.to_string(),
            });
        }

        let token = callback_token(&key);
        let slot = Arc::new(Slot {
            created_at: Utc::now(),
            cell: Mutex::new(None),
        });

        // Hold the slot while the prompt is sent so early clicks wait for it.
        let mut cell = slot.cell.lock().await;
        {
            let mut inner = self.inner.write().await;
            if inner.slots.contains_key(&key) {
                return Err(ModerationError::AlreadyPending {
                    key: key.to_string(),
                });
            }
            inner.slots.insert(key.clone(), Arc::clone(&slot));
            inner.tokens.insert(token.clone(), key.clone());
        }

        match self.notifier.present(&post, &token).await {
            Ok(prompt) => {
                info!(
                    key = %key,
                    token = %token,
                    items = post.item_count(),
                    "Post queued for moderation"
                );
                *cell = Some(PendingEntry {
                    post,
                    token: token.clone(),
                    prompt: Some(prompt.prompt),
                    previews: prompt.previews,
                });
                Ok(token)
            }
            Err(e) => {
                drop(cell);
                self.remove(&key, &token).await;
                Err(ModerationError::Notify(e))
            }
        }
    }

    /// Publish the post and close its entry. The entry is removed even when delivery fails.
    pub async fn approve(&self, token: &str) -> Result<DecisionOutcome, ModerationError> {
        let entry = self.take(token).await?;
        let post = &entry.post;

        match self.dispatcher.publish(post, &post.target).await {
            Ok(report) => {
                let status = if report.degraded() {
                    render::degraded_status(post, &post.target, report.delivered, report.skipped)
                } else {
                    render::approved_status(post, &post.target)
                };
                self.finalize(&entry, &status).await;
                info!(key = %post.key(), "Post approved");
                Ok(DecisionOutcome::Approved(report))
            }
            Err(e) => {
                error!(key = %post.key(), error = %e, "Approved post could not be delivered");
                self.finalize(
                    &entry,
                    &render::delivery_failed_status(&post.target, &e.to_string()),
                )
                .await;
                Err(ModerationError::Delivery(e))
            }
        }
    }

    /// Drop the post without publishing.
    pub async fn reject(&self, token: &str) -> Result<DecisionOutcome, ModerationError> {
        let entry = self.take(token).await?;
        self.finalize(&entry, &render::rejected_status(&entry.post))
            .await;
        info!(key = %entry.post.key(), "Post rejected");
        Ok(DecisionOutcome::Rejected)
    }

    /// Rewrite the post again from its original text.
    ///
    /// At the regeneration limit, or when the history cannot be persisted,
    /// the entry is left untouched.
    pub async fn regenerate(&self, token: &str) -> Result<DecisionOutcome, ModerationError> {
        let (key, slot) = self.lookup(token).await?;
        let mut cell = slot.cell.lock().await;
        let Some(entry) = cell.as_mut() else {
            return Err(stale(token));
        };

        let text = match self.engine.regenerate(&entry.post).await {
            Ok(text) => text,
            Err(e @ RewriteError::RegenerationLimitExceeded { .. }) => {
                warn!(key = %key, "Regeneration limit reached");
                return Err(ModerationError::Rewrite(e));
            }
            Err(e) => return Err(ModerationError::Rewrite(e)),
        };

        let count = entry.post.regeneration_count + 1;
        if let Err(e) = self.ledger.record_regeneration(&key, &text, count).await {
            error!(key = %key, error = %e, "Failed to record regeneration history");
            return Err(ModerationError::Ledger(e));
        }
        entry.post.regeneration_count = count;
        entry.post.rewritten_text = Some(text);
        if let Err(e) = self.notifier.refresh(entry).await {
            warn!(key = %key, error = %e, "Failed to refresh moderator prompt");
        }

        info!(key = %key, count, "Post text regenerated");
        Ok(DecisionOutcome::Regenerated { count })
    }

    /// Remove entries older than the TTL, whatever their state. Returns how many were dropped.
    ///
    /// Entries busy with a decision are left for the next sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut expired = Vec::new();
        {
            let mut inner = self.inner.write().await;
            let stale_keys: Vec<PostKey> = inner
                .slots
                .iter()
                .filter(|(_, slot)| now - slot.created_at > self.ttl)
                .map(|(key, _)| key.clone())
                .collect();

            for key in stale_keys {
                let Some(slot) = inner.slots.get(&key).cloned() else {
                    continue;
                };
                let Ok(mut cell) = slot.cell.try_lock() else {
                    continue;
                };
                let entry = cell.take();
                drop(cell);
                inner.slots.remove(&key);
                inner.tokens.retain(|_, k| k != &key);
                if let Some(entry) = entry {
                    expired.push(entry);
                }
            }
        }

        for entry in &expired {
            let Some(prompt) = &entry.prompt else {
                continue;
            };
            if let Err(e) = self.notifier.clear_controls(prompt).await {
                warn!(key = %entry.post.key(), error = %e, "Failed to clear expired prompt");
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired pending posts");
        }
        expired.len()
    }

    /// Snapshot of the pending post behind `token`.
    pub async fn get(&self, token: &str) -> Option<Post> {
        let (_, slot) = self.lookup(token).await.ok()?;
        let cell = slot.cell.lock().await;
        cell.as_ref().map(|entry| entry.post.clone())
    }

    pub async fn is_pending(&self, key: &PostKey) -> bool {
        self.inner.read().await.slots.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.slots.is_empty()
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn lookup(&self, token: &str) -> Result<(PostKey, Arc<Slot>), ModerationError> {
        let inner = self.inner.read().await;
        let key = inner.tokens.get(token).ok_or_else(|| stale(token))?;
        let slot = inner.slots.get(key).ok_or_else(|| stale(token))?;
        Ok((key.clone(), Arc::clone(slot)))
    }

    /// Take the entry out of its slot and unregister it.
    async fn take(&self, token: &str) -> Result<PendingEntry, ModerationError> {
        let (key, slot) = self.lookup(token).await?;
        let mut cell = slot.cell.lock().await;
        let entry = cell.take().ok_or_else(|| stale(token))?;
        drop(cell);
        self.remove(&key, token).await;
        Ok(entry)
    }

    async fn remove(&self, key: &PostKey, token: &str) {
        let mut inner = self.inner.write().await;
        inner.slots.remove(key);
        inner.tokens.remove(token);
    }

    async fn finalize(&self, entry: &PendingEntry, status: &str) {
        if let Err(e) = self.notifier.finalize(entry, status).await {
            warn!(key = %entry.post.key(), error = %e, "Failed to update moderator prompt");
        }
    }
}

fn stale(token: &str) -> ModerationError {
    ModerationError::Stale {
        token: token.to_string(),
    }
}
