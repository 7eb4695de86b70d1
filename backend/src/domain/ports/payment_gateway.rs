//! Driven port for moving escrowed funds.
//!
//! The domain decides *when* money moves; the adapter decides *how*. Every
//! call is made outside any storage lock and wrapped in the service's retry
//! budget, so adapters should report transient failures as retryable rather
//! than retrying internally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AuthorizationId, TransactionId};

use super::define_port_error;

/// Confirmation returned by a release or refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    /// Gateway-side reference for reconciliation.
    pub reference: String,
}

define_port_error! {
    /// Errors surfaced by payment gateway adapters.
    pub enum PaymentGatewayError {
        /// Network transport failed before receiving a response.
        Transport { message: String } =>
            "payment gateway transport failed: {message}",
        /// The call exceeded its timeout.
        Timeout { message: String } =>
            "payment gateway timeout: {message}",
        /// The gateway asked the caller to slow down.
        RateLimited { message: String } =>
            "payment gateway rate limited request: {message}",
        /// The gateway refused the operation.
        Rejected { message: String } =>
            "payment gateway rejected request: {message}",
        /// The gateway response could not be decoded.
        Decode { message: String } =>
            "payment gateway response decode failed: {message}",
    }
}

impl PaymentGatewayError {
    /// Return whether retrying this error is expected to help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }
}

/// Port for capture, release and refund of escrowed funds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Capture the buyer's deposit and return an authorization handle.
    async fn capture_deposit(
        &self,
        transaction_id: &TransactionId,
        amount: i64,
    ) -> Result<AuthorizationId, PaymentGatewayError>;

    /// Release `amount` of the captured funds to the seller.
    async fn release(
        &self,
        authorization: &AuthorizationId,
        amount: i64,
    ) -> Result<PaymentReceipt, PaymentGatewayError>;

    /// Return `amount` of the captured funds to the buyer.
    async fn refund(
        &self,
        authorization: &AuthorizationId,
        amount: i64,
    ) -> Result<PaymentReceipt, PaymentGatewayError>;
}

/// Gateway that accepts every call. Used by local runs with no payment
/// provider configured and by tests that do not exercise settlement.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixturePaymentGateway;

#[async_trait]
impl PaymentGateway for FixturePaymentGateway {
    async fn capture_deposit(
        &self,
        transaction_id: &TransactionId,
        _amount: i64,
    ) -> Result<AuthorizationId, PaymentGatewayError> {
        Ok(AuthorizationId::new(format!("fixture-{transaction_id}")))
    }

    async fn release(
        &self,
        authorization: &AuthorizationId,
        _amount: i64,
    ) -> Result<PaymentReceipt, PaymentGatewayError> {
        Ok(PaymentReceipt {
            reference: format!("release-{authorization}"),
        })
    }

    async fn refund(
        &self,
        authorization: &AuthorizationId,
        _amount: i64,
    ) -> Result<PaymentReceipt, PaymentGatewayError> {
        Ok(PaymentReceipt {
            reference: format!("refund-{authorization}"),
        })
    }
}
