//! Fire-and-forget sink for escrow events.

use async_trait::async_trait;

use crate::domain::EscrowEvent;

use super::define_port_error;

define_port_error! {
    /// Errors raised when an event cannot be handed off.
    pub enum NotificationDispatchError {
        /// The downstream channel refused the event.
        Unavailable { message: String } =>
            "notification channel unavailable: {message}",
    }
}

/// Port for publishing [`EscrowEvent`]s.
///
/// Callers log and swallow failures; an event that cannot be delivered never
/// fails the operation that produced it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Publish one event.
    async fn emit(&self, event: &EscrowEvent) -> Result<(), NotificationDispatchError>;
}
