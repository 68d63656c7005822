use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use reposter::channels::telegram::spawn_update_listener;
use reposter::channels::{ChannelPostBuffer, TelegramBot};
use reposter::config::{RepostConfig, load_channel_pairs};
use reposter::delivery::{DeliveryConfig, DeliveryDispatcher};
use reposter::llm::create_provider;
use reposter::moderation::{DecisionHandler, ModerationQueue, ModeratorNotifier, spawn_decision_handler};
use reposter::pipeline::{FeedScanner, Orchestrator, OrchestratorConfig, spawn_orchestrator};
use reposter::rewrite::{LlmTransformer, RewriteConfig, RewriteEngine, SimpleTransformer, TextTransformer};
use reposter::store::Ledger;

/// Console logging, plus a daily-rolling file when a log dir is set.
/// The returned guard flushes the file writer on drop.
fn init_tracing(log_dir: Option<PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "reposter.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = std::env::var("REPOSTER_LOG_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from);
    let _log_guard = init_tracing(log_dir);

    let config = RepostConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let pairs = load_channel_pairs(&config.channels_file).unwrap_or_else(|e| {
        eprintln!(
            "Error: Failed to load channel pairs from {}: {e}",
            config.channels_file.display()
        );
        std::process::exit(1);
    });

    let rewrite_config = RewriteConfig::from_env()?;
    let mut delivery_config = DeliveryConfig::from_env()?;
    let orchestrator_config = OrchestratorConfig::from_env()?;

    eprintln!("🤖 Reposter v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Moderator chat: {}", config.moderator_chat);
    eprintln!(
        "   Moderators: {}",
        if config.moderators.iter().any(|u| u == "*") {
            "everyone".to_string()
        } else {
            config.moderators.join(", ")
        }
    );
    for pair in &pairs {
        eprintln!("   Pair: {} ({} → {})", pair.label(), pair.source, pair.target);
    }
    eprintln!(
        "   Poll interval: {}s, pending TTL: {}h",
        orchestrator_config.poll_interval.as_secs(),
        config.pending_ttl.num_hours()
    );

    // ── Telegram ────────────────────────────────────────────────────────
    let bot = Arc::new(TelegramBot::new(config.bot_token.clone()));
    match bot.health_check().await {
        Ok(username) => eprintln!("   Bot: @{username}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }

    // ── Ledger ──────────────────────────────────────────────────────────
    let ledger = match Ledger::load(&config.ledger_path).await {
        Ok(ledger) => Arc::new(ledger),
        Err(e) => {
            tracing::error!(error = %e, "Ledger unusable, refusing to start");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    eprintln!(
        "   Ledger: {} ({} posts processed)",
        config.ledger_path.display(),
        ledger.processed_count().await
    );

    // ── Rewrite ─────────────────────────────────────────────────────────
    let transformer: Arc<dyn TextTransformer> = match &config.llm {
        Some(llm_config) => {
            eprintln!("   Rewrite model: {}", llm_config.model);
            let llm = create_provider(llm_config).unwrap_or_else(|e| {
                eprintln!("Error: {e}");
                std::process::exit(1);
            });
            Arc::new(LlmTransformer::new(llm, config.rewrite_max_tokens))
        }
        None => {
            eprintln!("   Rewrite model: none (REWRITE_API_KEY unset, dictionary rewriter)");
            Arc::new(SimpleTransformer::default())
        }
    };
    let engine = Arc::new(RewriteEngine::new(transformer, rewrite_config));

    // ── Delivery & moderation ───────────────────────────────────────────
    let buffer = Arc::new(ChannelPostBuffer::new(bot.clone()));

    if delivery_config.staging_chat.is_none() {
        delivery_config.staging_chat = Some(config.moderator_chat.clone());
    }
    let dispatcher = Arc::new(DeliveryDispatcher::new(
        buffer.clone(),
        bot.clone(),
        delivery_config,
    ));

    let notifier = ModeratorNotifier::new(bot.clone(), dispatcher.clone(), config.moderator_chat.clone());
    let queue = ModerationQueue::with_ttl(
        notifier,
        dispatcher,
        engine.clone(),
        ledger.clone(),
        config.pending_ttl,
    );

    let listener_shutdown = Arc::new(AtomicBool::new(false));
    let decisions = spawn_update_listener(
        bot.clone(),
        buffer.clone(),
        config.moderators.clone(),
        Arc::clone(&listener_shutdown),
    );
    let handler = Arc::new(DecisionHandler::new(queue.clone(), bot.clone()));
    let mut handler_handle = spawn_decision_handler(handler, decisions);

    // ── Pipeline ────────────────────────────────────────────────────────
    let scanner = FeedScanner::new(buffer, ledger.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        pairs,
        scanner,
        engine,
        ledger,
        queue,
        orchestrator_config,
    ));
    let (mut orchestrator_handle, orchestrator_shutdown) = spawn_orchestrator(orchestrator);

    eprintln!("   Running. Press Ctrl+C to stop.\n");

    let fatal = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            None
        }
        joined = &mut orchestrator_handle => Some(task_failure("orchestrator", joined)),
        joined = &mut handler_handle => Some(task_failure("decision handler", joined)),
    };

    orchestrator_shutdown.store(true, Ordering::Relaxed);
    listener_shutdown.store(true, Ordering::Relaxed);

    if let Some(err) = fatal {
        return Err(err);
    }

    tracing::info!("Shutdown requested, finishing current cycle");
    match orchestrator_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(e) => tracing::error!(error = %e, "Orchestrator task failed"),
    }

    Ok(())
}

/// Turn the early exit of a long-running task into the process error.
fn task_failure<E>(task: &str, joined: Result<Result<(), E>, JoinError>) -> anyhow::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    match joined {
        Ok(Err(e)) => {
            tracing::error!(task, error = %e, "Fatal error, shutting down");
            anyhow::Error::new(e).context(format!("{task} stopped"))
        }
        Ok(Ok(())) => anyhow::anyhow!("{task} stopped unexpectedly"),
        Err(e) => anyhow::Error::new(e).context(format!("{task} task failed")),
    }
}
