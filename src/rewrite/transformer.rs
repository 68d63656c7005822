//! Text transformers: the model-backed rewriter and a dictionary fallback.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RewriteError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Something that turns text into a reworded version of itself.
///
/// `creativity` is a sampling hint in roughly `[0, 1.5]`; transformers
/// without a notion of randomness ignore it.
#[async_trait]
pub trait TextTransformer: Send + Sync {
    async fn transform(&self, text: &str, creativity: f32) -> Result<String, RewriteError>;
}

const EDITOR_SYSTEM_PROMPT: &str = "Ты - профессиональный редактор.";

fn editor_prompt(text: &str) -> String {
    format!(
        "Перепиши текст, сохраняя основной смысл, но меняя формулировки, \
         структуру предложений и стиль. Сделай текст более уникальным и интересным. \
         Все ключевые факты исходного текста должны присутствовать. \
         Объем текста не должен быть больше чем 140% от оригинального текста. \
         Объем текста не должен быть меньше 60% оригинального текста. \
         Не добавляй комментарии, просто верни переписанный текст. \
         Используй Markdown разметку для форматирования: **жирный текст**, *курсив*. \
         Также удаляй рекламу из исходного текста, например: \
         \"[👉 Канал. Подписаться](https://t.me/+invite)\".\n\
         Текст:\n{text}"
    )
}

/// Completion budget for one rewrite.
pub const DEFAULT_MAX_TOKENS: u32 = 500;

/// Rewrites text through a chat completion model.
pub struct LlmTransformer {
    llm: Arc<dyn LlmProvider>,
    max_tokens: u32,
}

impl LlmTransformer {
    pub fn new(llm: Arc<dyn LlmProvider>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }
}

#[async_trait]
impl TextTransformer for LlmTransformer {
    async fn transform(&self, text: &str, creativity: f32) -> Result<String, RewriteError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(EDITOR_SYSTEM_PROMPT),
            ChatMessage::user(editor_prompt(text)),
        ])
        .with_temperature(creativity)
        .with_max_tokens(self.max_tokens);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| RewriteError::Transformer(e.to_string()))?;

        Ok(response.content.trim().to_string())
    }
}

/// Word-substitution rewriter used when no model is configured.
pub struct SimpleTransformer {
    replacements: Vec<(&'static str, &'static str)>,
}

impl Default for SimpleTransformer {
    fn default() -> Self {
        Self {
            replacements: vec![
                ("новость", "информация"),
                ("сообщает", "информирует"),
                ("сказал", "отметил"),
                ("заявил", "сообщил"),
                ("объявил", "проинформировал"),
                ("очень", "достаточно"),
                ("большой", "крупный"),
                ("маленький", "небольшой"),
                ("хороший", "качественный"),
                ("плохой", "неудовлетворительный"),
            ],
        }
    }
}

#[async_trait]
impl TextTransformer for SimpleTransformer {
    async fn transform(&self, text: &str, _creativity: f32) -> Result<String, RewriteError> {
        Ok(self
            .replacements
            .iter()
            .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::CompletionResponse;
    use std::sync::Mutex;

    struct RecordingLlm {
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().unwrap().push(request);
            Ok(CompletionResponse {
                content: "  reworded  ".into(),
                input_tokens: 10,
                output_tokens: 2,
            })
        }
    }

    #[tokio::test]
    async fn llm_transformer_passes_creativity_and_prompt() {
        let llm = Arc::new(RecordingLlm {
            seen: Mutex::new(Vec::new()),
        });
        let transformer = LlmTransformer::new(llm.clone(), 500);

        let out = transformer.transform("исходный текст", 0.8).await.unwrap();
        assert_eq!(out, "reworded");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].temperature, Some(0.8));
        assert_eq!(seen[0].max_tokens, Some(500));
        assert!(seen[0].messages[1].content.ends_with("исходный текст"));
    }

    #[tokio::test]
    async fn simple_transformer_swaps_words() {
        let out = SimpleTransformer::default()
            .transform("Очень большой город, новость дня", 0.0)
            .await
            .unwrap();
        assert_eq!(out, "Очень крупный город, информация дня");
    }
}
