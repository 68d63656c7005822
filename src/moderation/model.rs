//! Moderation data model: decision actions, callback tokens, pending entries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::channels::MessageHandle;
use crate::pipeline::types::{Post, PostKey};

/// Hex characters of the key digest carried in a callback.
const TOKEN_LEN: usize = 16;

/// A moderator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
    Regenerate,
}

impl DecisionAction {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Approve => "a",
            Self::Reject => "r",
            Self::Regenerate => "g",
        }
    }

    /// Callback payload `"<action>:<token>"` for a control button.
    pub fn callback_data(&self, token: &str) -> String {
        format!("{}:{token}", self.prefix())
    }

    /// Parse a callback payload back into its action and token.
    pub fn parse_callback(data: &str) -> Option<(Self, String)> {
        let (prefix, token) = data.split_once(':')?;
        let action = match prefix {
            "a" => Self::Approve,
            "r" => Self::Reject,
            "g" => Self::Regenerate,
            _ => return None,
        };
        if token.is_empty() {
            return None;
        }
        Some((action, token.to_string()))
    }
}

/// Short content-addressed token for a post key.
pub fn callback_token(key: &PostKey) -> String {
    let digest = Sha256::digest(key.as_str().as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(TOKEN_LEN);
    hex
}

/// A decision delivered by the moderator transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionEvent {
    /// Transport id used to acknowledge the event.
    pub event_id: String,
    pub action: DecisionAction,
    pub token: String,
    /// Message the pressed control belonged to.
    pub origin: Option<MessageHandle>,
    /// Who pressed it.
    pub user: Option<String>,
}

/// A post awaiting a decision, plus where its prompt lives.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub post: Post,
    pub token: String,
    /// Message carrying the controls.
    pub prompt: Option<MessageHandle>,
    /// Preview messages sent alongside the prompt (album previews).
    pub previews: Vec<MessageHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_roundtrip() {
        let data = DecisionAction::Regenerate.callback_data("0123abcd");
        assert_eq!(data, "g:0123abcd");
        assert_eq!(
            DecisionAction::parse_callback(&data),
            Some((DecisionAction::Regenerate, "0123abcd".to_string()))
        );
    }

    #[test]
    fn parse_rejects_unknown_prefix_and_empty_token() {
        assert_eq!(DecisionAction::parse_callback("x:abc"), None);
        assert_eq!(DecisionAction::parse_callback("a:"), None);
        assert_eq!(DecisionAction::parse_callback("approve_-100_5"), None);
    }

    #[test]
    fn token_is_stable_and_short() {
        let key = PostKey("-1001234567890_987654".into());
        let token = callback_token(&key);
        assert_eq!(token.len(), TOKEN_LEN);
        assert_eq!(token, callback_token(&key));
        assert_ne!(token, callback_token(&PostKey("-1001234567890_987655".into())));
        assert!(DecisionAction::Approve.callback_data(&token).len() <= 64);
    }
}
