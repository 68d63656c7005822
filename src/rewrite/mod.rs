//! Text rewriting: pluggable transformers, output validation, bounded retry.

pub mod engine;
pub mod transformer;
pub mod validation;

pub use engine::{RewriteConfig, RewriteEngine};
pub use transformer::{LlmTransformer, SimpleTransformer, TextTransformer};
pub use validation::{OutputBounds, Rejection};
