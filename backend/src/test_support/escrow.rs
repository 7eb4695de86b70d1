//! Shared test doubles and a service harness for escrow tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;
use uuid::Uuid;

use crate::domain::ports::{
    NoOpEscrowMetrics, NotificationDispatchError, NotificationDispatcher, PaymentGateway,
    PaymentGatewayError, PaymentReceipt,
};
use crate::domain::{
    Actor, AuthorizationId, BackoffJitter, EscrowEvent, EscrowService, EscrowServiceConfig,
    EscrowServicePorts, EscrowServiceRuntime, ListingId, SettlementKind, SettlementSleeper,
    TieredTrustPolicy, Transaction, TransactionAction, TransactionId, UserId,
};
use crate::outbound::memory::InMemoryEscrowStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("test double mutex poisoned"),
    }
}

pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => {
                panic!("failed to convert Duration to TimeDelta: {error}; delta={delta:?}",)
            }
        };
        *lock(&self.0) += delta;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *lock(&self.0) += TimeDelta::seconds(seconds);
    }

    pub fn advance_hours(&self, hours: i64) {
        *lock(&self.0) += TimeDelta::hours(hours);
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *lock(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateSleeper;

#[async_trait]
impl SettlementSleeper for ImmediateSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

#[derive(Default)]
pub struct RecordingSleeper(pub Mutex<Vec<Duration>>);

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        lock(&self.0).clone()
    }
}

#[async_trait]
impl SettlementSleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.0).push(duration);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        base
    }
}

/// One call observed by [`ScriptedPaymentGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentCall {
    Capture {
        transaction_id: TransactionId,
        amount: i64,
    },
    Release {
        authorization: AuthorizationId,
        amount: i64,
    },
    Refund {
        authorization: AuthorizationId,
        amount: i64,
    },
}

impl PaymentCall {
    pub fn kind(&self) -> SettlementKind {
        match self {
            Self::Capture { .. } => SettlementKind::Capture,
            Self::Release { .. } => SettlementKind::Release,
            Self::Refund { .. } => SettlementKind::Refund,
        }
    }
}

/// Gateway that replays queued failures, then succeeds.
///
/// Every call yields once before answering so concurrent callers interleave.
#[derive(Default)]
pub struct ScriptedPaymentGateway {
    capture_failures: Mutex<VecDeque<PaymentGatewayError>>,
    release_failures: Mutex<VecDeque<PaymentGatewayError>>,
    refund_failures: Mutex<VecDeque<PaymentGatewayError>>,
    calls: Mutex<Vec<PaymentCall>>,
}

impl ScriptedPaymentGateway {
    pub fn fail_next(&self, kind: SettlementKind, error: PaymentGatewayError) {
        self.queue(kind).push_back(error);
    }

    pub fn fail_times(&self, kind: SettlementKind, times: usize, error: &PaymentGatewayError) {
        for _ in 0..times {
            self.fail_next(kind, error.clone());
        }
    }

    pub fn calls(&self) -> Vec<PaymentCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, kind: SettlementKind) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    fn queue(&self, kind: SettlementKind) -> MutexGuard<'_, VecDeque<PaymentGatewayError>> {
        match kind {
            SettlementKind::Capture => lock(&self.capture_failures),
            SettlementKind::Release => lock(&self.release_failures),
            SettlementKind::Refund => lock(&self.refund_failures),
        }
    }

    async fn answer(&self, call: PaymentCall) -> Result<(), PaymentGatewayError> {
        tokio::task::yield_now().await;
        let kind = call.kind();
        lock(&self.calls).push(call);
        match self.queue(kind).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedPaymentGateway {
    async fn capture_deposit(
        &self,
        transaction_id: &TransactionId,
        amount: i64,
    ) -> Result<AuthorizationId, PaymentGatewayError> {
        self.answer(PaymentCall::Capture {
            transaction_id: *transaction_id,
            amount,
        })
        .await?;
        Ok(AuthorizationId::new(format!("auth-{transaction_id}")))
    }

    async fn release(
        &self,
        authorization: &AuthorizationId,
        amount: i64,
    ) -> Result<PaymentReceipt, PaymentGatewayError> {
        self.answer(PaymentCall::Release {
            authorization: authorization.clone(),
            amount,
        })
        .await?;
        Ok(PaymentReceipt {
            reference: format!("release-{authorization}-{amount}"),
        })
    }

    async fn refund(
        &self,
        authorization: &AuthorizationId,
        amount: i64,
    ) -> Result<PaymentReceipt, PaymentGatewayError> {
        self.answer(PaymentCall::Refund {
            authorization: authorization.clone(),
            amount,
        })
        .await?;
        Ok(PaymentReceipt {
            reference: format!("refund-{authorization}-{amount}"),
        })
    }
}

/// Notifier that keeps every event; can be switched to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<EscrowEvent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<EscrowEvent> {
        lock(&self.events).clone()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        lock(&self.events)
            .iter()
            .map(|event| event.kind.label())
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn emit(&self, event: &EscrowEvent) -> Result<(), NotificationDispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationDispatchError::unavailable("channel closed"));
        }
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// An [`EscrowService`] wired to in-memory doubles, plus the two parties.
pub struct EscrowHarness {
    pub store: Arc<InMemoryEscrowStore>,
    pub payments: Arc<ScriptedPaymentGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<MutableClock>,
    pub sleeper: Arc<RecordingSleeper>,
    pub service: EscrowService,
    pub buyer: UserId,
    pub seller: UserId,
}

impl EscrowHarness {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_config(now, EscrowServiceConfig::default())
    }

    pub fn with_config(now: DateTime<Utc>, config: EscrowServiceConfig) -> Self {
        let store = Arc::new(InMemoryEscrowStore::new());
        let payments = Arc::new(ScriptedPaymentGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(MutableClock::new(now));
        let sleeper = Arc::new(RecordingSleeper::default());
        let ports = EscrowServicePorts::new(
            store.clone(),
            store.clone(),
            store.clone(),
            payments.clone(),
            notifier.clone(),
            Arc::new(NoOpEscrowMetrics),
        );
        let runtime = EscrowServiceRuntime {
            sleeper: sleeper.clone(),
            jitter: Arc::new(NoJitter),
        };
        let service = EscrowService::with_runtime(
            ports,
            clock.clone(),
            Arc::new(TieredTrustPolicy::default()),
            runtime,
            config,
        );
        Self {
            store,
            payments,
            notifier,
            clock,
            sleeper,
            service,
            buyer: UserId::random(),
            seller: UserId::random(),
        }
    }

    pub fn buyer_actor(&self) -> Actor {
        Actor::User(self.buyer.clone())
    }

    pub fn seller_actor(&self) -> Actor {
        Actor::User(self.seller.clone())
    }

    pub async fn open(&self, amount: i64) -> Transaction {
        match self
            .service
            .create_transaction(
                self.buyer.clone(),
                self.seller.clone(),
                ListingId::new(Uuid::new_v4()),
                amount,
            )
            .await
        {
            Ok(transaction) => transaction,
            Err(error) => panic!("create transaction: {error}"),
        }
    }

    /// Apply `action` and panic on failure.
    pub async fn act(
        &self,
        id: TransactionId,
        actor: Actor,
        action: TransactionAction,
    ) -> Transaction {
        let kind = action.kind();
        match self.service.transition(id, actor, action).await {
            Ok(transaction) => transaction,
            Err(error) => panic!("{kind} failed: {error}"),
        }
    }

    /// Open a transaction and drive it to `DEPOSIT_ACCEPTED`.
    pub async fn accepted(&self, amount: i64) -> Transaction {
        let opened = self.open(amount).await;
        self.act(opened.id(), self.buyer_actor(), TransactionAction::SubmitDeposit)
            .await;
        self.act(opened.id(), self.seller_actor(), TransactionAction::AcceptDeposit)
            .await
    }

    /// Open a transaction and schedule its meetup `meetup_in` from now.
    pub async fn scheduled(&self, amount: i64, meetup_in: TimeDelta) -> Transaction {
        let accepted = self.accepted(amount).await;
        let meetup_at = self.clock.utc() + meetup_in;
        self.act(
            accepted.id(),
            self.buyer_actor(),
            TransactionAction::ScheduleMeetup { meetup_at },
        )
        .await
    }
}
