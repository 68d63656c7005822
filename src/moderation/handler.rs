//! Decision handler: turns moderator events into queue transitions.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::{DecisionStream, ModeratorTransport};
use crate::error::{ModerationError, RewriteError};

use super::model::{DecisionAction, DecisionEvent};
use super::queue::{DecisionOutcome, ModerationQueue};
use super::render;

/// Applies decision events to the queue and acknowledges them.
pub struct DecisionHandler {
    queue: Arc<ModerationQueue>,
    transport: Arc<dyn ModeratorTransport>,
}

impl DecisionHandler {
    pub fn new(queue: Arc<ModerationQueue>, transport: Arc<dyn ModeratorTransport>) -> Self {
        Self { queue, transport }
    }

    /// Handle one event. Returns the notice shown to the moderator, or the
    /// error when it is fatal to the process.
    pub async fn handle(&self, event: DecisionEvent) -> Result<String, ModerationError> {
        debug!(
            action = ?event.action,
            token = %event.token,
            user = event.user.as_deref().unwrap_or("unknown"),
            "Decision received"
        );

        let result = match event.action {
            DecisionAction::Approve => self.queue.approve(&event.token).await,
            DecisionAction::Reject => self.queue.reject(&event.token).await,
            DecisionAction::Regenerate => self.queue.regenerate(&event.token).await,
        };

        let mut fatal = None;
        let notice = match result {
            Ok(DecisionOutcome::Approved(report)) if report.degraded() => {
                "⚠️ Published in reduced form".to_string()
            }
            Ok(DecisionOutcome::Approved(_)) => "✅ Published".to_string(),
            Ok(DecisionOutcome::Rejected) => "❌ Rejected".to_string(),
            Ok(DecisionOutcome::Regenerated { count }) => {
                format!("🔄 Text regenerated ({count})")
            }
            Err(ModerationError::Stale { .. }) => {
                info!(token = %event.token, "Decision on stale post");
                if let Some(origin) = &event.origin {
                    if let Err(e) = self.transport.clear_controls(origin).await {
                        debug!(error = %e, "Failed to clear stale controls");
                    }
                }
                render::STALE_NOTICE.to_string()
            }
            Err(ModerationError::Rewrite(RewriteError::RegenerationLimitExceeded { max })) => {
                render::regeneration_limit_notice(max)
            }
            Err(e) if e.is_fatal() => {
                error!(token = %event.token, error = %e, "Decision hit a ledger failure");
                let notice = format!("⚠️ {e}");
                fatal = Some(e);
                notice
            }
            Err(e) => {
                warn!(token = %event.token, error = %e, "Decision failed");
                format!("⚠️ {e}")
            }
        };

        if let Err(e) = self.transport.answer_decision(&event.event_id, &notice).await {
            warn!(error = %e, "Failed to answer decision event");
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(notice),
        }
    }
}

/// Consume decision events, handling each on its own task.
///
/// The task ends with the first fatal error any event produces.
pub fn spawn_decision_handler(
    handler: Arc<DecisionHandler>,
    mut events: DecisionStream,
) -> JoinHandle<Result<(), ModerationError>> {
    tokio::spawn(async move {
        info!("Decision handler started");
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<ModerationError>();
        let mut in_flight = Vec::new();

        loop {
            tokio::select! {
                Some(e) = fatal_rx.recv() => return Err(e),
                event = events.next() => {
                    let Some(event) = event else { break };
                    let handler = Arc::clone(&handler);
                    let fatal_tx = fatal_tx.clone();
                    in_flight.retain(|task: &JoinHandle<()>| !task.is_finished());
                    in_flight.push(tokio::spawn(async move {
                        if let Err(e) = handler.handle(event).await {
                            let _ = fatal_tx.send(e);
                        }
                    }));
                }
            }
        }

        // Let decisions already under way finish before reporting.
        drop(fatal_tx);
        for task in in_flight {
            let _ = task.await;
        }
        info!("Decision stream closed");
        match fatal_rx.recv().await {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
}
