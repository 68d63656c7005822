//! Configuration types.
//!
//! Everything is read from the environment at startup; the channel pairs
//! come from a JSON file. Any error here is fatal.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::llm::{DEFAULT_API_BASE, DEFAULT_MODEL, LlmConfig};
use crate::moderation::queue::DEFAULT_PENDING_TTL_HOURS;
use crate::pipeline::types::{ChannelPair, ChatId};
use crate::rewrite::transformer::DEFAULT_MAX_TOKENS;

/// Parse `key` from the environment, falling back to `default` when unset.
///
/// A value that is set but unparsable is an error, not a silent default.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("cannot parse {raw:?}"),
            })
        }
        _ => Ok(default),
    }
}

/// Comma-separated list from the environment, trimmed, empties dropped.
pub fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|raw| parse_list(&raw))
        .unwrap_or_default()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_required(key: &str, hint: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        }),
    }
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct RepostConfig {
    pub bot_token: SecretString,
    /// Chat where decision prompts are posted.
    pub moderator_chat: ChatId,
    /// User ids or usernames allowed to decide. `*` allows everyone.
    pub moderators: Vec<String>,
    pub channels_file: PathBuf,
    pub ledger_path: PathBuf,
    pub pending_ttl: chrono::Duration,
    /// Directory for daily log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Rewrite model. `None` selects the offline dictionary rewriter.
    pub llm: Option<LlmConfig>,
    pub rewrite_max_tokens: u32,
}

impl RepostConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = env_required(
            "TELEGRAM_BOT_TOKEN",
            "export TELEGRAM_BOT_TOKEN=123456:ABC-...",
        )?;
        let moderator_chat = env_required(
            "REPOSTER_MODERATOR_CHAT",
            "set it to the chat id that receives decision prompts",
        )?;

        let mut moderators = env_list("REPOSTER_MODERATORS");
        if moderators.is_empty() {
            moderators.push("*".to_string());
        }

        let ttl_hours: i64 = env_parse("REPOSTER_PENDING_TTL_HOURS", DEFAULT_PENDING_TTL_HOURS)?;
        if ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "REPOSTER_PENDING_TTL_HOURS".into(),
                message: "must be positive".into(),
            });
        }

        let llm = env_optional("REWRITE_API_KEY").map(|key| LlmConfig {
            api_key: SecretString::from(key),
            api_base: env_optional("REWRITE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into()),
            model: env_optional("REWRITE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
        });

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            moderator_chat: ChatId::new(moderator_chat),
            moderators,
            channels_file: env_optional("REPOSTER_CHANNELS_FILE")
                .unwrap_or_else(|| "channel_config.json".into())
                .into(),
            ledger_path: env_optional("REPOSTER_LEDGER_PATH")
                .unwrap_or_else(|| "processed_posts.json".into())
                .into(),
            pending_ttl: chrono::Duration::hours(ttl_hours),
            log_dir: env_optional("REPOSTER_LOG_DIR").map(PathBuf::from),
            llm,
            rewrite_max_tokens: env_parse("REWRITE_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
        })
    }
}

// ── Channel pairs file ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChannelPairsFile {
    #[serde(default)]
    channel_pairs: Vec<PairEntry>,
}

#[derive(Debug, Deserialize)]
struct PairEntry {
    source: ChatRef,
    target: ChatRef,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// Chat ids appear both as strings and as bare numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatRef {
    Text(String),
    Number(i64),
}

impl ChatRef {
    fn into_id(self, field: &str, index: usize) -> Result<String, ConfigError> {
        let raw = match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
        };
        if raw.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("channel_pairs[{index}].{field}"),
                message: "empty chat id".into(),
            });
        }
        Ok(raw)
    }
}

/// Load the configured channel pairs. An empty list is an error.
pub fn load_channel_pairs(path: &Path) -> Result<Vec<ChannelPair>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_channel_pairs(&content)
}

/// Parse a channel pairs document.
pub fn parse_channel_pairs(content: &str) -> Result<Vec<ChannelPair>, ConfigError> {
    let file: ChannelPairsFile = serde_json::from_str(content)
        .map_err(|e| ConfigError::ParseError(format!("channel pairs: {e}")))?;

    if file.channel_pairs.is_empty() {
        return Err(ConfigError::MissingRequired {
            key: "channel_pairs".into(),
            hint: "add at least one {\"source\": ..., \"target\": ...} entry".into(),
        });
    }

    file.channel_pairs
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let mut pair = ChannelPair::new(
                entry.source.into_id("source", i)?,
                entry.target.into_id("target", i)?,
            );
            if let Some(name) = entry.name.filter(|n| !n.trim().is_empty()) {
                pair = pair.with_name(name);
            }
            if let Some(username) = entry.username.filter(|u| !u.trim().is_empty()) {
                pair = pair.with_username(username);
            }
            Ok(pair)
        })
        .collect()
}
