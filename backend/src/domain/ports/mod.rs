//! Domain ports for the escrow core.
//!
//! Driven adapters implement these traits; the escrow service only ever sees
//! the trait objects.

mod macros;

pub(crate) use macros::define_port_error;

mod escrow_metrics;
mod notification_dispatcher;
mod payment_gateway;
mod review_repository;
mod transaction_repository;
mod user_statistics_repository;

#[cfg(test)]
pub use escrow_metrics::MockEscrowMetrics;
pub use escrow_metrics::{AdjustmentResult, EscrowMetrics, EscrowMetricsError, NoOpEscrowMetrics};
#[cfg(test)]
pub use notification_dispatcher::MockNotificationDispatcher;
pub use notification_dispatcher::{NotificationDispatchError, NotificationDispatcher};
#[cfg(test)]
pub use payment_gateway::MockPaymentGateway;
pub use payment_gateway::{
    FixturePaymentGateway, PaymentGateway, PaymentGatewayError, PaymentReceipt,
};
#[cfg(test)]
pub use review_repository::MockReviewRepository;
pub use review_repository::{ReviewRepository, ReviewRepositoryError};
#[cfg(test)]
pub use transaction_repository::MockTransactionRepository;
pub use transaction_repository::{TransactionRepository, TransactionRepositoryError};
#[cfg(test)]
pub use user_statistics_repository::MockUserStatisticsRepository;
pub use user_statistics_repository::{
    DeltaApplication, UserStatisticsRepository, UserStatisticsRepositoryError,
};
