//! Escrow domain: transaction lifecycle, cancellation timing and reputation.
//!
//! Purpose: keep state legality, timing classification and reputation
//! bookkeeping free of transport and storage concerns. Adapters reach the
//! domain only through [`ports`] and [`EscrowService`].
//!
//! Public surface:
//! - Error / ErrorCode: transport agnostic failure payload.
//! - Transaction and its state machine ([`machine`]).
//! - [`classify_cancellation`]: pure timing classifier.
//! - Reputation engine ([`outcome_adjustments`], [`TrustPolicy`]).
//! - [`EscrowService`]: the operations exposed to driving adapters.

pub mod cancellation_timing;
pub mod error;
pub mod escrow_service;
pub mod events;
pub mod ports;
pub mod reputation;
pub mod review;
pub mod statistics;
pub mod transaction;
pub mod user;

pub use self::cancellation_timing::{
    classify_cancellation, CancellationTiming, ParseCancellationTimingError,
};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::escrow_service::{
    AttemptJitter, BackoffJitter, EscrowService, EscrowServiceConfig, EscrowServicePorts,
    EscrowServiceRuntime, RetryPolicy, SettlementSleeper, SweepPolicy, SweepReport, TokioSleeper,
};
pub use self::events::{EscrowEvent, EscrowEventKind};
pub use self::reputation::{
    outcome_adjustments, review_adjustment, AdjustmentKey, OutcomeKind, TieredTrustPolicy,
    TrustPolicy, UserAdjustment,
};
pub use self::review::{Rating, Review, ReviewDraft, ReviewValidationError, RATING_MAX, RATING_MIN};
pub use self::statistics::{
    clamp_trust, StatisticsDelta, UserStatistics, TRUST_SCORE_INITIAL, TRUST_SCORE_MAX,
    TRUST_SCORE_MIN,
};
pub use self::transaction::machine;
pub use self::transaction::{
    ActionKind, Actor, AuthorizationId, Cancellation, CancelledBy, Dispute, DisputeOutcome,
    ListingId, ManualReviewFlag, NewTransaction, ParseTransactionStatusError, PartyRole,
    SettlementClaim, SettlementKind, Transaction, TransactionAction, TransactionId,
    TransactionParts, TransactionStatus,
};
pub use self::user::{UserId, UserValidationError};
