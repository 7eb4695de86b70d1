//! PostgreSQL-backed `TransactionRepository` with version-checked updates.
//!
//! Nested records (cancellation, dispute) are stored as JSONB; settlement
//! claims and manual-review flags are flattened into nullable columns so the
//! sweep can filter on them.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{TransactionRepository, TransactionRepositoryError};
use crate::domain::{
    AuthorizationId, ListingId, ManualReviewFlag, SettlementClaim, SettlementKind, Transaction,
    TransactionId, TransactionParts, TransactionStatus, UserId,
};

use super::error_mapping::{is_unique_violation, map_basic_diesel_error, map_basic_pool_error};
use super::models::{NewTransactionRow, TransactionChangeset, TransactionRow};
use super::pool::{DbPool, PoolError};
use super::schema::escrow_transactions;

/// Diesel-backed implementation of the `TransactionRepository` port.
#[derive(Clone)]
pub struct DieselTransactionRepository {
    pool: DbPool,
}

impl DieselTransactionRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> TransactionRepositoryError {
    map_basic_pool_error(error, TransactionRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> TransactionRepositoryError {
    map_basic_diesel_error(
        error,
        TransactionRepositoryError::query,
        TransactionRepositoryError::connection,
    )
}

fn terminal_statuses() -> Vec<&'static str> {
    TransactionStatus::ALL
        .iter()
        .filter(|status| status.is_terminal())
        .map(TransactionStatus::as_str)
        .collect()
}

fn decode_json<T: serde::de::DeserializeOwned>(
    value: Option<serde_json::Value>,
    column: &str,
) -> Result<Option<T>, TransactionRepositoryError> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(|err| TransactionRepositoryError::query(format!("invalid {column}: {err}")))
}

fn encode_json<T: serde::Serialize>(
    value: Option<&T>,
    column: &str,
) -> Result<Option<serde_json::Value>, TransactionRepositoryError> {
    value
        .map(serde_json::to_value)
        .transpose()
        .map_err(|err| TransactionRepositoryError::query(format!("encode {column}: {err}")))
}

/// Convert a database row to a domain transaction.
fn row_to_transaction(row: TransactionRow) -> Result<Transaction, TransactionRepositoryError> {
    let status = row
        .status
        .parse::<TransactionStatus>()
        .map_err(|err| TransactionRepositoryError::query(err.to_string()))?;
    let settlement_claim = match (row.settlement_claim_kind, row.settlement_claimed_at) {
        (Some(kind), Some(claimed_at)) => Some(SettlementClaim {
            kind: kind
                .parse::<SettlementKind>()
                .map_err(|err| TransactionRepositoryError::query(err.to_string()))?,
            claimed_at,
        }),
        _ => None,
    };
    let manual_review = match (row.manual_review_reason, row.manual_review_flagged_at) {
        (Some(reason), Some(flagged_at)) => Some(ManualReviewFlag { reason, flagged_at }),
        _ => None,
    };

    Ok(Transaction::from_parts(TransactionParts {
        id: TransactionId::new(row.id),
        buyer_id: UserId::from(row.buyer_id),
        seller_id: UserId::from(row.seller_id),
        listing_id: ListingId::new(row.listing_id),
        amount: row.amount,
        status,
        version: row.version,
        scheduled_meetup_at: row.scheduled_meetup_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
        deposit_submitted_at: row.deposit_submitted_at,
        cancellation: decode_json(row.cancellation, "cancellation")?,
        dispute: decode_json(row.dispute, "dispute")?,
        partial_refund: row.partial_refund,
        authorization_id: row.authorization_id.map(AuthorizationId::new),
        settlement_claim,
        manual_review,
        reputation_settled_at: row.reputation_settled_at,
    }))
}

fn changeset(
    transaction: &Transaction,
    version: i64,
) -> Result<TransactionChangeset<'_>, TransactionRepositoryError> {
    let claim = transaction.settlement_claim();
    let flag = transaction.manual_review();
    Ok(TransactionChangeset {
        status: transaction.status().as_str(),
        version,
        scheduled_meetup_at: transaction.scheduled_meetup_at(),
        updated_at: transaction.updated_at(),
        deposit_submitted_at: transaction.deposit_submitted_at(),
        cancellation: encode_json(transaction.cancellation(), "cancellation")?,
        dispute: encode_json(transaction.dispute(), "dispute")?,
        partial_refund: transaction.partial_refund(),
        authorization_id: transaction.authorization_id().map(AsRef::as_ref),
        settlement_claim_kind: claim.map(|c| c.kind.as_str()),
        settlement_claimed_at: claim.map(|c| c.claimed_at),
        manual_review_reason: flag.map(|f| f.reason.as_str()),
        manual_review_flagged_at: flag.map(|f| f.flagged_at),
        reputation_settled_at: transaction.reputation_settled_at(),
    })
}

fn rows_to_transactions(
    rows: Vec<TransactionRow>,
) -> Result<Vec<Transaction>, TransactionRepositoryError> {
    rows.into_iter().map(row_to_transaction).collect()
}

#[async_trait]
impl TransactionRepository for DieselTransactionRepository {
    async fn load(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Transaction>, TransactionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<TransactionRow> = escrow_transactions::table
            .filter(escrow_transactions::id.eq(id.as_uuid()))
            .select(TransactionRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(row_to_transaction).transpose()
    }

    async fn insert(&self, transaction: &Transaction) -> Result<(), TransactionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let new_row = NewTransactionRow {
            id: *transaction.id().as_uuid(),
            buyer_id: *transaction.buyer_id().as_uuid(),
            seller_id: *transaction.seller_id().as_uuid(),
            listing_id: *transaction.listing_id().as_uuid(),
            amount: transaction.amount(),
            status: transaction.status().as_str(),
            version: transaction.version(),
            created_at: transaction.created_at(),
            updated_at: transaction.updated_at(),
        };

        diesel::insert_into(escrow_transactions::table)
            .values(&new_row)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| {
                if is_unique_violation(&err) {
                    TransactionRepositoryError::duplicate(transaction.id().to_string())
                } else {
                    map_diesel_error(err)
                }
            })
    }

    async fn save(
        &self,
        transaction: &Transaction,
        expected_version: i64,
    ) -> Result<Transaction, TransactionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let update = changeset(transaction, expected_version + 1)?;

        let updated: Option<TransactionRow> = diesel::update(escrow_transactions::table)
            .filter(
                escrow_transactions::id
                    .eq(transaction.id().as_uuid())
                    .and(escrow_transactions::version.eq(expected_version)),
            )
            .set(&update)
            .returning(TransactionRow::as_returning())
            .get_result(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        if let Some(row) = updated {
            return row_to_transaction(row);
        }

        let exists: Option<i64> = escrow_transactions::table
            .filter(escrow_transactions::id.eq(transaction.id().as_uuid()))
            .select(escrow_transactions::version)
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        match exists {
            Some(_) => Err(TransactionRepositoryError::version_conflict(
                expected_version,
            )),
            None => Err(TransactionRepositoryError::query(format!(
                "transaction {} not found for update",
                transaction.id()
            ))),
        }
    }

    async fn list_open(&self) -> Result<Vec<Transaction>, TransactionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<TransactionRow> = escrow_transactions::table
            .filter(escrow_transactions::status.ne_all(terminal_statuses()))
            .order((escrow_transactions::created_at.asc(), escrow_transactions::id.asc()))
            .select(TransactionRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows_to_transactions(rows)
    }

    async fn list_unsettled_terminal(
        &self,
    ) -> Result<Vec<Transaction>, TransactionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<TransactionRow> = escrow_transactions::table
            .filter(escrow_transactions::status.eq_any(terminal_statuses()))
            .filter(escrow_transactions::reputation_settled_at.is_null())
            .order((escrow_transactions::updated_at.asc(), escrow_transactions::id.asc()))
            .select(TransactionRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows_to_transactions(rows)
    }
}
