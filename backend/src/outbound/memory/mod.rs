//! In-process store implementing every escrow repository port.
//!
//! One `tokio::sync::Mutex` guards all state, so a version check and its
//! write, or a marker insert and its increment, happen as one step. Used by
//! the worker when no database is configured and by the test suites.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::ports::{
    DeltaApplication, ReviewRepository, ReviewRepositoryError, TransactionRepository,
    TransactionRepositoryError, UserStatisticsRepository, UserStatisticsRepositoryError,
};
use crate::domain::{
    AdjustmentKey, Review, StatisticsDelta, Transaction, TransactionId, UserId, UserStatistics,
};

#[derive(Default)]
struct StoreState {
    transactions: HashMap<TransactionId, Transaction>,
    statistics: HashMap<Uuid, UserStatistics>,
    applied: HashSet<(AdjustmentKey, Uuid)>,
    reviews: Vec<Review>,
}

/// Mutex-guarded in-memory escrow store.
#[derive(Default)]
pub struct InMemoryEscrowStore {
    state: Mutex<StoreState>,
}

impl InMemoryEscrowStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of adjustment markers recorded, across all users.
    pub async fn applied_adjustment_count(&self) -> usize {
        self.state.lock().await.applied.len()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryEscrowStore {
    async fn load(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Transaction>, TransactionRepositoryError> {
        Ok(self.state.lock().await.transactions.get(id).cloned())
    }

    async fn insert(&self, transaction: &Transaction) -> Result<(), TransactionRepositoryError> {
        let mut state = self.state.lock().await;
        if state.transactions.contains_key(&transaction.id()) {
            return Err(TransactionRepositoryError::duplicate(
                transaction.id().to_string(),
            ));
        }
        state
            .transactions
            .insert(transaction.id(), transaction.clone());
        Ok(())
    }

    async fn save(
        &self,
        transaction: &Transaction,
        expected_version: i64,
    ) -> Result<Transaction, TransactionRepositoryError> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.transactions.get_mut(&transaction.id()) else {
            return Err(TransactionRepositoryError::query(format!(
                "transaction {} not found",
                transaction.id()
            )));
        };
        if stored.version() != expected_version {
            return Err(TransactionRepositoryError::version_conflict(expected_version));
        }
        let mut next = transaction.clone();
        next.set_version(expected_version + 1);
        *stored = next.clone();
        Ok(next)
    }

    async fn list_open(&self) -> Result<Vec<Transaction>, TransactionRepositoryError> {
        let state = self.state.lock().await;
        let mut open: Vec<_> = state
            .transactions
            .values()
            .filter(|t| !t.status().is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|t| (t.created_at(), t.id()));
        Ok(open)
    }

    async fn list_unsettled_terminal(
        &self,
    ) -> Result<Vec<Transaction>, TransactionRepositoryError> {
        let state = self.state.lock().await;
        let mut unsettled: Vec<_> = state
            .transactions
            .values()
            .filter(|t| t.status().is_terminal() && t.reputation_settled_at().is_none())
            .cloned()
            .collect();
        unsettled.sort_by_key(|t| (t.updated_at(), t.id()));
        Ok(unsettled)
    }
}

#[async_trait]
impl UserStatisticsRepository for InMemoryEscrowStore {
    async fn load(
        &self,
        user_id: &UserId,
    ) -> Result<UserStatistics, UserStatisticsRepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .statistics
            .get(user_id.as_uuid())
            .cloned()
            .unwrap_or_else(|| UserStatistics::new(user_id.clone())))
    }

    async fn apply_delta(
        &self,
        user_id: &UserId,
        delta: &StatisticsDelta,
        key: &AdjustmentKey,
    ) -> Result<DeltaApplication, UserStatisticsRepositoryError> {
        let mut state = self.state.lock().await;
        if !state.applied.insert((*key, *user_id.as_uuid())) {
            return Ok(DeltaApplication::Duplicate);
        }
        let stats = state
            .statistics
            .entry(*user_id.as_uuid())
            .or_insert_with(|| UserStatistics::new(user_id.clone()));
        stats.apply(delta);
        Ok(DeltaApplication::Applied(stats.clone()))
    }
}

#[async_trait]
impl ReviewRepository for InMemoryEscrowStore {
    async fn insert(&self, review: &Review) -> Result<(), ReviewRepositoryError> {
        let mut state = self.state.lock().await;
        let exists = state.reviews.iter().any(|r| {
            r.transaction_id == review.transaction_id
                && r.rater_id.as_uuid() == review.rater_id.as_uuid()
        });
        if exists {
            return Err(ReviewRepositoryError::duplicate_review(
                review.transaction_id.to_string(),
                review.rater_id.to_string(),
            ));
        }
        state.reviews.push(review.clone());
        Ok(())
    }

    async fn list_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<Review>, ReviewRepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .reviews
            .iter()
            .filter(|r| &r.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}
