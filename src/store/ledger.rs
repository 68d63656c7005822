//! Dedup ledger: durable record of posts already handed to moderation.
//!
//! The ledger is a single JSON document:
//!
//! ```json
//! {
//!   "processed_posts": { "<source>": ["<source>_<id>", ...] },
//!   "regeneration_history": { "<key>": [{ "timestamp": ..., "text": ..., "attempt": 1 }] },
//!   "last_updated": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! Every mutation is persisted before it returns. Writes go to a sibling
//! `.tmp` file which is fsynced and renamed over the ledger, so a crash
//! leaves either the old or the new document on disk, never a torn one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::pipeline::types::{Post, PostKey};

/// One regenerated text, kept for the moderator's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerationRecord {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub attempt: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    processed_posts: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    regeneration_history: BTreeMap<String, Vec<RegenerationRecord>>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

impl LedgerState {
    fn contains(&self, key: &PostKey) -> bool {
        self.processed_posts
            .values()
            .any(|keys| keys.contains(key.as_str()))
    }
}

/// File-backed idempotency ledger.
pub struct Ledger {
    path: PathBuf,
    state: RwLock<LedgerState>,
}

impl Ledger {
    /// Open the ledger at `path`. A missing file is an empty ledger.
    ///
    /// Legacy shapes are normalised on load: a scalar key becomes a
    /// one-element set, anything else that is not a list becomes empty,
    /// and sources left without keys are dropped. When normalisation
    /// changed anything the cleaned document is written back.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let path_str = path.display().to_string();

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path_str, "No ledger found, starting empty");
                return Ok(Self {
                    path,
                    state: RwLock::new(LedgerState::default()),
                });
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    path: path_str,
                    source,
                });
            }
        };

        let (state, normalised) = parse_state(&raw).map_err(|reason| LedgerError::Corrupt {
            path: path_str.clone(),
            reason,
        })?;

        let total: usize = state.processed_posts.values().map(BTreeSet::len).sum();
        info!(
            path = %path_str,
            sources = state.processed_posts.len(),
            posts = total,
            "Ledger loaded"
        );

        let ledger = Self {
            path,
            state: RwLock::new(state),
        };

        if normalised {
            warn!(path = %path_str, "Ledger contained legacy or duplicate entries, rewriting");
            ledger.persist().await?;
        }

        Ok(ledger)
    }

    /// Whether the post with this key was already processed.
    pub async fn is_processed(&self, key: &PostKey) -> bool {
        self.state.read().await.contains(key)
    }

    /// Record a post as processed and persist. On persist failure the
    /// in-memory entry is rolled back so memory never runs ahead of disk.
    pub async fn mark_processed(&self, post: &Post) -> Result<(), LedgerError> {
        let key = post.key();
        let source = post.source.as_str().to_string();

        let mut state = self.state.write().await;
        let inserted = state
            .processed_posts
            .entry(source.clone())
            .or_default()
            .insert(key.as_str().to_string());

        if !inserted {
            debug!(key = %key, "Post already in ledger");
            return Ok(());
        }

        state.last_updated = Some(Utc::now());
        if let Err(e) = write_atomic(&self.path, &state).await {
            if let Some(keys) = state.processed_posts.get_mut(&source) {
                keys.remove(key.as_str());
                if keys.is_empty() {
                    state.processed_posts.remove(&source);
                }
            }
            return Err(e);
        }

        debug!(key = %key, "Post marked processed");
        Ok(())
    }

    /// Append a regenerated text to the post's history and persist.
    pub async fn record_regeneration(
        &self,
        key: &PostKey,
        text: &str,
        attempt: u32,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        state
            .regeneration_history
            .entry(key.as_str().to_string())
            .or_default()
            .push(RegenerationRecord {
                timestamp: Utc::now(),
                text: text.to_string(),
                attempt,
            });
        state.last_updated = Some(Utc::now());

        if let Err(e) = write_atomic(&self.path, &state).await {
            if let Some(history) = state.regeneration_history.get_mut(key.as_str()) {
                history.pop();
                if history.is_empty() {
                    state.regeneration_history.remove(key.as_str());
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Regeneration history for a post, oldest first.
    pub async fn regeneration_history(&self, key: &PostKey) -> Vec<RegenerationRecord> {
        self.state
            .read()
            .await
            .regeneration_history
            .get(key.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of recorded posts across all sources.
    pub async fn processed_count(&self) -> usize {
        self.state
            .read()
            .await
            .processed_posts
            .values()
            .map(BTreeSet::len)
            .sum()
    }

    /// Write the current state to disk.
    pub async fn persist(&self) -> Result<(), LedgerError> {
        let state = self.state.read().await;
        write_atomic(&self.path, &state).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Parse a ledger document, returning the state and whether it needed cleanup.
fn parse_state(raw: &str) -> Result<(LedgerState, bool), String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let Some(root) = value.as_object() else {
        return Err("top-level value is not an object".into());
    };

    let mut normalised = false;
    let mut processed_posts = BTreeMap::new();

    match root.get("processed_posts") {
        None | Some(serde_json::Value::Null) => {}
        Some(serde_json::Value::Object(sources)) => {
            for (source, entry) in sources {
                let keys: BTreeSet<String> = match entry {
                    serde_json::Value::String(key) => {
                        normalised = true;
                        std::iter::once(key.clone()).collect()
                    }
                    serde_json::Value::Array(items) => {
                        let keys: BTreeSet<String> = items
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect();
                        if keys.len() != items.len() {
                            normalised = true;
                        }
                        keys
                    }
                    _ => {
                        normalised = true;
                        BTreeSet::new()
                    }
                };

                if keys.is_empty() {
                    normalised = true;
                    continue;
                }
                processed_posts.insert(source.clone(), keys);
            }
        }
        Some(_) => return Err("processed_posts is not an object".into()),
    }

    let regeneration_history = match root.get("regeneration_history") {
        None | Some(serde_json::Value::Null) => BTreeMap::new(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| format!("regeneration_history: {e}"))?,
    };

    let last_updated = root
        .get("last_updated")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok((
        LedgerState {
            processed_posts,
            regeneration_history,
            last_updated,
        },
        normalised,
    ))
}

/// Write to `<path>.tmp`, fsync, then rename over `path`.
async fn write_atomic(path: &Path, state: &LedgerState) -> Result<(), LedgerError> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let path_str = path.display().to_string();
    let tmp = tmp_path(path);

    let persist_err = |source| LedgerError::Persist {
        path: path_str.clone(),
        source,
    };

    let mut file = tokio::fs::File::create(&tmp).await.map_err(persist_err)?;
    file.write_all(&bytes).await.map_err(persist_err)?;
    file.sync_all().await.map_err(persist_err)?;
    drop(file);
    tokio::fs::rename(&tmp, path).await.map_err(persist_err)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}
