//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{escrow_reviews, escrow_transactions, reputation_adjustments, user_statistics};

// ---------------------------------------------------------------------------
// Transaction models
// ---------------------------------------------------------------------------

/// Row struct for reading from the escrow_transactions table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = escrow_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TransactionRow {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub listing_id: Uuid,
    pub amount: i64,
    pub status: String,
    pub version: i64,
    pub scheduled_meetup_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deposit_submitted_at: Option<DateTime<Utc>>,
    pub cancellation: Option<serde_json::Value>,
    pub dispute: Option<serde_json::Value>,
    pub partial_refund: bool,
    pub authorization_id: Option<String>,
    pub settlement_claim_kind: Option<String>,
    pub settlement_claimed_at: Option<DateTime<Utc>>,
    pub manual_review_reason: Option<String>,
    pub manual_review_flagged_at: Option<DateTime<Utc>>,
    pub reputation_settled_at: Option<DateTime<Utc>>,
}

/// Insertable struct for new transactions.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = escrow_transactions)]
pub(crate) struct NewTransactionRow<'a> {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub listing_id: Uuid,
    pub amount: i64,
    pub status: &'a str,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Changeset for the mutable columns of a transaction.
///
/// `None` clears the column.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = escrow_transactions)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct TransactionChangeset<'a> {
    pub status: &'a str,
    pub version: i64,
    pub scheduled_meetup_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub deposit_submitted_at: Option<DateTime<Utc>>,
    pub cancellation: Option<serde_json::Value>,
    pub dispute: Option<serde_json::Value>,
    pub partial_refund: bool,
    pub authorization_id: Option<&'a str>,
    pub settlement_claim_kind: Option<&'a str>,
    pub settlement_claimed_at: Option<DateTime<Utc>>,
    pub manual_review_reason: Option<&'a str>,
    pub manual_review_flagged_at: Option<DateTime<Utc>>,
    pub reputation_settled_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Statistics models
// ---------------------------------------------------------------------------

/// Row struct for reading from the user_statistics table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_statistics)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserStatisticsRow {
    pub user_id: Uuid,
    pub completed_transactions: i32,
    pub cancellations: i32,
    pub last_minute_cancels_as_seller: i32,
    pub last_minute_cancels_as_buyer: i32,
    pub rating_count: i32,
    pub average_rating: f64,
    pub trust_score: i32,
    pub version: i64,
}

/// Seed row; every other column takes its default.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_statistics)]
pub(crate) struct NewUserStatisticsRow {
    pub user_id: Uuid,
}

/// Changeset written after a delta is applied.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = user_statistics)]
pub(crate) struct UserStatisticsChangeset {
    pub completed_transactions: i32,
    pub cancellations: i32,
    pub last_minute_cancels_as_seller: i32,
    pub last_minute_cancels_as_buyer: i32,
    pub rating_count: i32,
    pub average_rating: f64,
    pub trust_score: i32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Applied-delta marker.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = reputation_adjustments)]
pub(crate) struct NewAdjustmentRow {
    pub adjustment_key: String,
    pub user_id: Uuid,
    pub delta: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Review models
// ---------------------------------------------------------------------------

/// Review row, used for both reads and inserts.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = escrow_reviews)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ReviewRow {
    pub transaction_id: Uuid,
    pub rater_id: Uuid,
    pub rated_id: Uuid,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
