//! Rewrite engine: bounded retry around a [`TextTransformer`].
//!
//! `rewrite` never fails: empty input and the media-only placeholder pass
//! through untouched, and when every attempt is rejected the original text
//! comes back. Only `regenerate` can fail, when a post has used up its
//! regeneration budget.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::transformer::TextTransformer;
use super::validation::{self, OutputBounds, Rejection};
use crate::config::env_parse;
use crate::error::{ConfigError, RewriteError};
use crate::pipeline::types::{MAX_REGENERATIONS, MEDIA_ONLY_SENTINEL, Post};

/// Rewrite tuning.
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    pub bounds: OutputBounds,
    /// Transformer calls per rewrite.
    pub max_attempts: u32,
    /// Creativity for attempt `n` is `base_creativity + n * creativity_step`.
    pub base_creativity: f32,
    pub creativity_step: f32,
    pub max_regenerations: u32,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            bounds: OutputBounds::default(),
            max_attempts: 3,
            base_creativity: 0.7,
            creativity_step: 0.1,
            max_regenerations: MAX_REGENERATIONS,
        }
    }
}

impl RewriteConfig {
    /// Build from `REWRITE_*` environment variables, keeping defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bounds: OutputBounds {
                min_ratio: env_parse("REWRITE_MIN_RATIO", defaults.bounds.min_ratio)?,
                max_ratio: env_parse("REWRITE_MAX_RATIO", defaults.bounds.max_ratio)?,
                max_similarity: env_parse(
                    "REWRITE_MAX_SIMILARITY",
                    defaults.bounds.max_similarity,
                )?,
            },
            max_attempts: env_parse("REWRITE_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            ..defaults
        })
    }

    fn creativity(&self, attempt: u32) -> f32 {
        self.base_creativity + attempt as f32 * self.creativity_step
    }
}

/// Validating, retrying rewriter.
pub struct RewriteEngine {
    transformer: Arc<dyn TextTransformer>,
    config: RewriteConfig,
}

impl RewriteEngine {
    pub fn new(transformer: Arc<dyn TextTransformer>, config: RewriteConfig) -> Self {
        Self {
            transformer,
            config,
        }
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Rewrite `text`, returning the input unchanged if no attempt validates.
    pub async fn rewrite(&self, text: &str) -> String {
        if text.trim().is_empty() || text == MEDIA_ONLY_SENTINEL {
            return text.to_string();
        }

        for attempt in 1..=self.config.max_attempts {
            let creativity = self.config.creativity(attempt);
            debug!(attempt, creativity, "Rewrite attempt");

            let candidate = match self.transformer.transform(text, creativity).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(attempt, error = %e, "Transformer call failed");
                    continue;
                }
            };

            match self.validate(text, &candidate).await {
                Ok(()) => {
                    info!(attempt, chars = candidate.chars().count(), "Text rewritten");
                    return candidate.trim().to_string();
                }
                Err(rejection) => {
                    warn!(attempt, reason = %rejection, "Rewrite rejected");
                }
            }
        }

        warn!(
            attempts = self.config.max_attempts,
            "No valid rewrite, keeping original text"
        );
        text.to_string()
    }

    /// Similarity is quadratic in the text length, so validation runs on the
    /// blocking pool.
    async fn validate(&self, text: &str, candidate: &str) -> Result<(), Rejection> {
        let input = text.to_string();
        let output = candidate.to_string();
        let bounds = self.config.bounds.clone();
        match tokio::task::spawn_blocking(move || validation::validate(&input, &output, &bounds))
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Validation task failed");
                Err(Rejection::Unchanged)
            }
        }
    }

    /// Produce a fresh rewrite of the post's original text.
    ///
    /// Fails once the post has been regenerated `max_regenerations` times.
    pub async fn regenerate(&self, post: &Post) -> Result<String, RewriteError> {
        let max = self.config.max_regenerations;
        if post.regeneration_count >= max {
            return Err(RewriteError::RegenerationLimitExceeded { max });
        }
        Ok(self.rewrite(&post.original_text).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{ChannelPair, RawItem};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const INPUT: &str = "Сегодня в городе открылся новый парк с фонтанами и детскими площадками.";
    const GOOD: &str = "В центре появился свежий сквер: фонтаны, качели и места для прогулок.";

    /// Replays scripted outputs and records the creativity of each call.
    struct ScriptedTransformer {
        outputs: Mutex<Vec<Result<String, RewriteError>>>,
        creativity: Mutex<Vec<f32>>,
    }

    impl ScriptedTransformer {
        fn new(outputs: Vec<Result<String, RewriteError>>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.into_iter().rev().collect()),
                creativity: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<f32> {
            self.creativity.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextTransformer for ScriptedTransformer {
        async fn transform(&self, text: &str, creativity: f32) -> Result<String, RewriteError> {
            self.creativity.lock().unwrap().push(creativity);
            self.outputs
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(text.to_string()))
        }
    }

    fn engine(t: Arc<ScriptedTransformer>) -> RewriteEngine {
        RewriteEngine::new(t, RewriteConfig::default())
    }

    #[tokio::test]
    async fn first_valid_attempt_wins() {
        let t = ScriptedTransformer::new(vec![Ok(GOOD.into())]);
        let out = engine(t.clone()).rewrite(INPUT).await;
        assert_eq!(out, GOOD);
        assert_eq!(t.calls().len(), 1);
    }

    #[tokio::test]
    async fn short_output_rejected_every_attempt_returns_input() {
        let short: String = INPUT.chars().take(INPUT.chars().count() * 3 / 10).collect();
        let t = ScriptedTransformer::new(vec![
            Ok(short.clone()),
            Ok(short.clone()),
            Ok(short.clone()),
        ]);
        let out = engine(t.clone()).rewrite(INPUT).await;

        assert_eq!(out, INPUT);
        let calls = t.calls();
        assert_eq!(calls.len(), 3);
        assert!((calls[0] - 0.8).abs() < 1e-6);
        assert!((calls[1] - 0.9).abs() < 1e-6);
        assert!((calls[2] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn transformer_error_counts_as_attempt() {
        let t = ScriptedTransformer::new(vec![
            Err(RewriteError::Transformer("boom".into())),
            Ok("Sorry, I cannot help with this request about a park in the city.".into()),
            Ok(GOOD.into()),
        ]);
        let out = engine(t.clone()).rewrite(INPUT).await;
        assert_eq!(out, GOOD);
        assert_eq!(t.calls().len(), 3);
    }

    #[tokio::test]
    async fn sentinel_and_empty_bypass_transformer() {
        let t = ScriptedTransformer::new(vec![]);
        let e = engine(t.clone());
        assert_eq!(e.rewrite(MEDIA_ONLY_SENTINEL).await, MEDIA_ONLY_SENTINEL);
        assert_eq!(e.rewrite("  ").await, "  ");
        assert!(t.calls().is_empty());
    }

    #[tokio::test]
    async fn regenerate_respects_cap() {
        let t = ScriptedTransformer::new(vec![Ok(GOOD.into())]);
        let e = engine(t.clone());
        let pair = ChannelPair::new("@src", "@dst");
        let mut post = Post::standalone(&pair, &RawItem::text(1, INPUT), INPUT.into());

        post.regeneration_count = MAX_REGENERATIONS - 1;
        assert_eq!(e.regenerate(&post).await.unwrap(), GOOD);

        post.regeneration_count = MAX_REGENERATIONS;
        let err = e.regenerate(&post).await.unwrap_err();
        assert!(matches!(
            err,
            RewriteError::RegenerationLimitExceeded { max: MAX_REGENERATIONS }
        ));
        assert_eq!(t.calls().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn long_text_validation_does_not_block_runtime() {
        let input: String = (0..500).map(|i| format!("новость{i} ")).collect();
        let candidate: String = (0..500).map(|i| format!("событие{i} ")).collect();
        let t = ScriptedTransformer::new(vec![Ok(candidate.clone())]);

        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_millis(1));
                loop {
                    interval.tick().await;
                    ticks.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            })
        };

        let started = std::time::Instant::now();
        let out = engine(t).rewrite(&input).await;
        let elapsed = started.elapsed();
        let seen = ticks.load(std::sync::atomic::Ordering::Relaxed);
        ticker.abort();

        assert!(out == candidate.trim() || out == input);
        // The single-threaded runtime keeps ticking while similarity is computed.
        if elapsed >= std::time::Duration::from_millis(20) {
            assert!(seen > 2, "runtime stalled for {elapsed:?}, {seen} ticks");
        }
    }
}
