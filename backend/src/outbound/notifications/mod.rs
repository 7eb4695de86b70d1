//! Notification adapters for escrow events.
//!
//! - [`TracingNotificationDispatcher`] writes each event as a structured log
//!   line, for deployments that ship logs to an event pipeline.
//! - [`BroadcastNotificationDispatcher`] fans events out to in-process
//!   subscribers over a `tokio` broadcast channel.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use crate::domain::EscrowEvent;
use crate::domain::ports::{NotificationDispatchError, NotificationDispatcher};

/// Logs every event under the `escrow_events` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingNotificationDispatcher {
    async fn emit(&self, event: &EscrowEvent) -> Result<(), NotificationDispatchError> {
        let payload = serde_json::to_string(event)
            .map_err(|err| NotificationDispatchError::unavailable(err.to_string()))?;
        info!(
            target: "escrow_events",
            transaction_id = %event.transaction_id,
            event = event.kind.label(),
            payload = %payload,
            "escrow event"
        );
        Ok(())
    }
}

/// Publishes events to a bounded broadcast channel.
///
/// Slow subscribers lag and lose events rather than blocking the service.
#[derive(Debug, Clone)]
pub struct BroadcastNotificationDispatcher {
    sender: broadcast::Sender<EscrowEvent>,
}

impl BroadcastNotificationDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationDispatcher for BroadcastNotificationDispatcher {
    async fn emit(&self, event: &EscrowEvent) -> Result<(), NotificationDispatchError> {
        self.sender
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| NotificationDispatchError::unavailable("no active subscribers"))
    }
}
