//! Reqwest-backed payment gateway adapter.
//!
//! Owns transport details only: request shapes, timeouts, idempotency keys
//! and HTTP error mapping. Retries are the service's job, so every transient
//! failure is reported as a retryable error rather than retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::dto::{
    CaptureRequestDto, CaptureResponseDto, SettlementAmountDto, SettlementResponseDto,
};
use crate::domain::ports::{PaymentGateway, PaymentGatewayError, PaymentReceipt};
use crate::domain::{AuthorizationId, TransactionId};

const DEFAULT_USER_AGENT: &str = "escrow-backend/0.1";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Payment gateway adapter that talks to one provider base URL.
pub struct HttpPaymentGateway {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpPaymentGateway {
    /// Build an adapter with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        base_url: Url,
        timeout: Duration,
        api_key: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PaymentGatewayError> {
        self.base_url
            .join(path)
            .map_err(|err| PaymentGatewayError::rejected(format!("invalid endpoint {path}: {err}")))
    }

    async fn post<B, R>(
        &self,
        path: &str,
        idempotency_key: &str,
        body: &B,
    ) -> Result<R, PaymentGatewayError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(self.endpoint(path)?)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, bytes.as_ref()));
        }
        decode(bytes.as_ref())
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn capture_deposit(
        &self,
        transaction_id: &TransactionId,
        amount: i64,
    ) -> Result<AuthorizationId, PaymentGatewayError> {
        let reference = transaction_id.to_string();
        let body = CaptureRequestDto {
            reference: &reference,
            amount,
        };
        let response: CaptureResponseDto = self
            .post("captures", &format!("capture-{reference}"), &body)
            .await?;
        if response.authorization_id.trim().is_empty() {
            return Err(PaymentGatewayError::decode("empty authorization id"));
        }
        Ok(AuthorizationId::new(response.authorization_id))
    }

    async fn release(
        &self,
        authorization: &AuthorizationId,
        amount: i64,
    ) -> Result<PaymentReceipt, PaymentGatewayError> {
        let path = format!("authorizations/{authorization}/release");
        let response: SettlementResponseDto = self
            .post(
                &path,
                &format!("release-{authorization}-{amount}"),
                &SettlementAmountDto { amount },
            )
            .await?;
        Ok(PaymentReceipt {
            reference: response.reference,
        })
    }

    async fn refund(
        &self,
        authorization: &AuthorizationId,
        amount: i64,
    ) -> Result<PaymentReceipt, PaymentGatewayError> {
        let path = format!("authorizations/{authorization}/refund");
        let response: SettlementResponseDto = self
            .post(
                &path,
                &format!("refund-{authorization}-{amount}"),
                &SettlementAmountDto { amount },
            )
            .await?;
        Ok(PaymentReceipt {
            reference: response.reference,
        })
    }
}

fn decode<R: DeserializeOwned>(body: &[u8]) -> Result<R, PaymentGatewayError> {
    serde_json::from_slice(body).map_err(|error| {
        PaymentGatewayError::decode(format!(
            "invalid payment response: {error}; body={}",
            body_preview(body)
        ))
    })
}

fn map_transport_error(error: reqwest::Error) -> PaymentGatewayError {
    if error.is_timeout() {
        PaymentGatewayError::timeout(error.to_string())
    } else {
        PaymentGatewayError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> PaymentGatewayError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), preview)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => PaymentGatewayError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            PaymentGatewayError::timeout(message)
        }
        _ if status.is_client_error() => PaymentGatewayError::rejected(message),
        _ => PaymentGatewayError::transport(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
