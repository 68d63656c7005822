//! Bridges rig's `CompletionModel` to [`LlmProvider`].

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::message::{AssistantContent, Message};

use super::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};
use crate::error::LlmError;

const PROVIDER: &str = "rig";

/// Wraps any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

/// Rig takes the system prompt as a preamble and the last user turn as the
/// prompt; everything in between is chat history.
#[derive(Debug)]
struct SplitRequest {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: String,
}

fn split_messages(messages: Vec<ChatMessage>) -> Result<SplitRequest, LlmError> {
    let mut preamble: Option<String> = None;
    let mut turns: Vec<ChatMessage> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                preamble = Some(match preamble {
                    Some(existing) => format!("{existing}\n\n{}", message.content),
                    None => message.content,
                });
            }
            Role::User | Role::Assistant => turns.push(message),
        }
    }

    let prompt = match turns.pop() {
        Some(last) if last.role == Role::User => last.content,
        _ => {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: "request must end with a user message".into(),
            });
        }
    };

    let history = turns
        .into_iter()
        .map(|m| match m.role {
            Role::Assistant => Message::assistant(m.content),
            _ => Message::user(m.content),
        })
        .collect();

    Ok(SplitRequest {
        preamble,
        history,
        prompt,
    })
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let split = split_messages(request.messages)?;

        let mut builder = self
            .model
            .completion_request(Message::user(split.prompt))
            .messages(split.history);
        if let Some(preamble) = split.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        })?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.model_name.clone(),
                reason: "no text in completion".into(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
        })
    }
}
