//! Wire shapes for the payment provider's JSON API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CaptureRequestDto<'a> {
    pub reference: &'a str,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CaptureResponseDto {
    pub authorization_id: String,
}

/// Body for partial or full releases and refunds.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SettlementAmountDto {
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SettlementResponseDto {
    pub reference: String,
}
