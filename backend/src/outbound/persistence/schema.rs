//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `migrations/` exactly. When migrations change,
//! regenerate with `diesel print-schema` or update by hand.

diesel::table! {
    /// Escrow transactions. `version` backs optimistic concurrency.
    escrow_transactions (id) {
        id -> Uuid,
        buyer_id -> Uuid,
        seller_id -> Uuid,
        listing_id -> Uuid,
        amount -> Int8,
        status -> Text,
        version -> Int8,
        scheduled_meetup_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deposit_submitted_at -> Nullable<Timestamptz>,
        /// Serialized cancellation record.
        cancellation -> Nullable<Jsonb>,
        /// Serialized dispute record.
        dispute -> Nullable<Jsonb>,
        partial_refund -> Bool,
        authorization_id -> Nullable<Text>,
        settlement_claim_kind -> Nullable<Text>,
        settlement_claimed_at -> Nullable<Timestamptz>,
        manual_review_reason -> Nullable<Text>,
        manual_review_flagged_at -> Nullable<Timestamptz>,
        reputation_settled_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Per-user reputation counters.
    user_statistics (user_id) {
        user_id -> Uuid,
        completed_transactions -> Int4,
        cancellations -> Int4,
        last_minute_cancels_as_seller -> Int4,
        last_minute_cancels_as_buyer -> Int4,
        rating_count -> Int4,
        average_rating -> Float8,
        trust_score -> Int4,
        version -> Int8,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Applied-delta markers; the primary key makes each delta apply once.
    reputation_adjustments (adjustment_key, user_id) {
        adjustment_key -> Text,
        user_id -> Uuid,
        delta -> Jsonb,
        applied_at -> Timestamptz,
    }
}

diesel::table! {
    /// One review per rater per transaction.
    escrow_reviews (transaction_id, rater_id) {
        transaction_id -> Uuid,
        rater_id -> Uuid,
        rated_id -> Uuid,
        rating -> Int2,
        comment -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(escrow_reviews -> escrow_transactions (transaction_id));

diesel::allow_tables_to_appear_in_same_query!(
    escrow_transactions,
    user_statistics,
    reputation_adjustments,
    escrow_reviews,
);
