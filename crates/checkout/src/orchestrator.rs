//! Checkout saga orchestrator.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Clock, ReservationId, SessionId};
use event_bus::{EventPublisher, PublishContext, Topic, Version, topics};
use payment::{ChargeRequest, Payment, PaymentStatus};
use resilience::{Breaker, Breakers, CallError, guarded, retry, timed};
use serde::Serialize;

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result, StoreError};
use crate::events::{AGGREGATE_TYPE, CheckoutCompleted, CheckoutFailed, CheckoutStarted};
use crate::services::{InventoryClient, OrderClient, OrderRequest, OrderStatus, PaymentClient, ServiceError};
use crate::session::{CheckoutSession, StartCheckout};
use crate::state::CheckoutStatus;
use crate::store::SessionStore;

pub const STEP_RESERVE_ITEMS: &str = "reserve_items";
pub const STEP_CREATE_ORDER: &str = "create_order";
pub const STEP_CHARGE_PAYMENT: &str = "charge_payment";
pub const STEP_CONFIRM_PAYMENT: &str = "confirm_payment";

/// Why a step stopped before its next collaborator call.
#[derive(Debug)]
enum Interrupt {
    Expired,
    Canceled(String),
}

/// Drives checkout sessions through reserve → order → charge.
///
/// Every forward call goes through the target's circuit breaker with a
/// per-step timeout. A failed step compensates completed steps in reverse
/// order (payment, order, reservations) with bounded retry and ends the
/// session `failed`. The session record is the only state: any orchestrator
/// instance can resume any session with [`advance`](Self::advance).
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    store: Arc<dyn SessionStore>,
    inventory: Arc<dyn InventoryClient>,
    orders: Arc<dyn OrderClient>,
    payments: Arc<dyn PaymentClient>,
    breakers: Breakers,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
    config: CheckoutConfig,
}

impl CheckoutOrchestrator {
    /// Creates an orchestrator with one fresh breaker per target.
    pub fn new(
        store: Arc<dyn SessionStore>,
        inventory: Arc<dyn InventoryClient>,
        orders: Arc<dyn OrderClient>,
        payments: Arc<dyn PaymentClient>,
        clock: Arc<dyn Clock>,
        publisher: EventPublisher,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            orders,
            payments,
            breakers: Breakers::new(&config.breaker),
            clock,
            publisher,
            config,
        }
    }

    /// Replaces the breakers, e.g. to share them between orchestrators.
    pub fn with_breakers(mut self, breakers: Breakers) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn breakers(&self) -> &Breakers {
        &self.breakers
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Validates the command and persists a new `initiated` session.
    #[tracing::instrument(skip(self, command), fields(user_id = %command.user_id, items = command.items.len()))]
    pub async fn start_checkout(&self, command: StartCheckout) -> Result<CheckoutSession> {
        command.validate()?;
        let session = command.into_session(self.clock.now(), self.config.session_ttl);
        self.store.insert(&session).await?;

        metrics::counter!("checkout_sessions_started_total").increment(1);
        tracing::info!(session_id = %session.id, total = %session.total, "checkout started");
        self.emit(topics::CHECKOUT_STARTED, &session, &CheckoutStarted::from(&session))
            .await;
        Ok(session)
    }

    pub async fn get_session(&self, id: SessionId) -> Result<CheckoutSession> {
        self.store.load(id).await?.ok_or(CheckoutError::NotFound(id))
    }

    /// Runs the step for the session's current status.
    ///
    /// A terminal session is returned unchanged. Expiry and cancellation are
    /// checked before every collaborator call. Step failures are not errors:
    /// the returned session is `failed` with its reason recorded.
    #[tracing::instrument(skip(self, id), fields(session_id = %id))]
    pub async fn advance(&self, id: SessionId) -> Result<CheckoutSession> {
        let session = self.get_session(id).await?;
        let Some(step) = session.status.step() else {
            return Ok(session);
        };

        tracing::info!(step, status = %session.status, "saga step started");
        let started = Instant::now();
        let result = match session.status {
            CheckoutStatus::Initiated => self.reserve_items(session).await,
            CheckoutStatus::ItemsReserved => self.create_order(session).await,
            CheckoutStatus::PaymentPending => self.charge_payment(session).await,
            CheckoutStatus::PaymentProcessing => self.confirm_payment(session).await,
            CheckoutStatus::Completed | CheckoutStatus::Failed | CheckoutStatus::Expired => {
                Ok(session)
            }
        };
        metrics::histogram!("checkout_step_duration_seconds", "step" => step)
            .record(started.elapsed().as_secs_f64());

        if let Ok(session) = &result {
            tracing::info!(step, status = %session.status, "saga step finished");
        }
        result
    }

    /// Calls [`advance`](Self::advance) until the session is terminal or is
    /// waiting on a collaborator.
    pub async fn run_to_completion(&self, id: SessionId) -> Result<CheckoutSession> {
        loop {
            let before = self.get_session(id).await?;
            if before.is_terminal() {
                return Ok(before);
            }
            let after = self.advance(id).await?;
            if after.is_terminal() || after.status == before.status {
                return Ok(after);
            }
        }
    }

    /// Records a cancellation and tries to act on it right away.
    ///
    /// If another task is advancing the session, that task observes the
    /// request at its next collaborator call and the current record is
    /// returned.
    #[tracing::instrument(skip(self, id), fields(session_id = %id))]
    pub async fn request_cancel(&self, id: SessionId, reason: &str) -> Result<CheckoutSession> {
        let session = self
            .store
            .request_cancel(id, reason)
            .await?
            .ok_or(CheckoutError::NotFound(id))?;
        if session.is_terminal() {
            return Ok(session);
        }
        tracing::info!(reason, "cancellation requested");

        match self.advance(id).await {
            Err(CheckoutError::Conflict { .. }) => self.get_session(id).await,
            other => other,
        }
    }

    /// Moves a non-terminal session past its deadline to `expired`,
    /// compensating whatever it holds.
    ///
    /// A session whose payment was already captured is completed instead.
    #[tracing::instrument(skip(self, id), fields(session_id = %id))]
    pub async fn expire(&self, id: SessionId) -> Result<CheckoutSession> {
        let session = self.get_session(id).await?;
        if !session.is_expired_at(self.clock.now()) {
            return Ok(session);
        }
        self.expire_session(session).await
    }

    /// Re-runs compensation for a session flagged `reconciliation_required`.
    ///
    /// Clears the flag on success; fails with `CompensationFailure` while
    /// any compensating call still fails.
    #[tracing::instrument(skip(self, id), fields(session_id = %id))]
    pub async fn reconcile(&self, id: SessionId) -> Result<CheckoutSession> {
        let mut session = self.get_session(id).await?;
        if !session.reconciliation_required {
            return Ok(session);
        }
        if !session.is_terminal() {
            return Err(CheckoutError::InvalidState {
                id,
                status: session.status,
            });
        }

        let errors = self
            .compensate(&session, CheckoutStatus::PaymentProcessing)
            .await;
        self.record_compensation(&mut session, errors.clone());
        let session = self.persist(session).await?;

        if errors.is_empty() {
            tracing::info!("session reconciled");
            Ok(session)
        } else {
            Err(CheckoutError::CompensationFailure { id, errors })
        }
    }

    /// Expires up to `limit` open sessions past their deadline.
    ///
    /// Returns how many ended `expired`. Sessions another writer is
    /// advancing are left for the next pass.
    pub async fn sweep_expired(&self, limit: usize) -> Result<usize> {
        let due = self.store.list_expired(self.clock.now(), limit).await?;
        let mut expired = 0;
        for id in due {
            match self.expire(id).await {
                Ok(session) if session.status == CheckoutStatus::Expired => expired += 1,
                Ok(_) => {}
                Err(CheckoutError::Conflict { .. }) => {}
                Err(e) => tracing::warn!(session_id = %id, error = %e, "failed to expire session"),
            }
        }
        Ok(expired)
    }

    /// Reconciles up to `limit` flagged sessions. Returns how many were
    /// cleared.
    pub async fn reconcile_flagged(&self, limit: usize) -> Result<usize> {
        let flagged = self.store.list_needing_reconciliation(limit).await?;
        let mut cleared = 0;
        for id in flagged {
            match self.reconcile(id).await {
                Ok(_) => cleared += 1,
                Err(e) => tracing::warn!(session_id = %id, error = %e, "session still needs reconciliation"),
            }
        }
        Ok(cleared)
    }

    // Steps

    async fn reserve_items(&self, mut session: CheckoutSession) -> Result<CheckoutSession> {
        for index in 0..session.items.len() {
            if let Some(existing) = session.items[index].reservation_id {
                if let Some(interrupt) = self.checkpoint(&mut session).await? {
                    return self.interrupted(session, interrupt).await;
                }
                let active = self.call(
                    STEP_RESERVE_ITEMS,
                    &self.breakers.inventory,
                    self.config.inventory_timeout,
                    self.inventory.is_active(existing),
                );
                match active.await {
                    Ok(true) => continue,
                    Ok(false) => {
                        tracing::info!(reservation_id = %existing, "reservation lapsed, reserving again");
                        session.items[index].reservation_id = None;
                    }
                    Err(e) => return self.fail_step(session, e).await,
                }
            }

            if let Some(interrupt) = self.checkpoint(&mut session).await? {
                return self.interrupted(session, interrupt).await;
            }
            let ttl = (session.expires_at - self.clock.now()).max(chrono::Duration::seconds(1));
            let reserved = self.call(
                STEP_RESERVE_ITEMS,
                &self.breakers.inventory,
                self.config.inventory_timeout,
                self.inventory.reserve(session.id, &session.items[index], ttl),
            );
            let reservation_id = match reserved.await {
                Ok(reservation_id) => reservation_id,
                Err(e) => return self.fail_step(session, e).await,
            };

            session.items[index].reservation_id = Some(reservation_id);
            session = match self.persist(session).await {
                Ok(saved) => saved,
                Err(e) => {
                    tracing::warn!(%reservation_id, error = %e, "session save failed, releasing reservation");
                    if let Err(release) = self.release_reservation(reservation_id).await {
                        tracing::error!(%reservation_id, error = %release, "could not release reservation, it will lapse");
                    }
                    return Err(e);
                }
            };
        }

        session.status = CheckoutStatus::ItemsReserved;
        self.persist(session).await
    }

    async fn create_order(&self, mut session: CheckoutSession) -> Result<CheckoutSession> {
        if let Some(interrupt) = self.checkpoint(&mut session).await? {
            return self.interrupted(session, interrupt).await;
        }

        let existing = self.call(
            STEP_CREATE_ORDER,
            &self.breakers.order,
            self.config.order_timeout,
            self.orders.find_by_checkout(session.id),
        );
        let order_id = match existing.await {
            Ok(Some(order)) if order.status == OrderStatus::Pending => order.id,
            Ok(Some(order)) => {
                let reason = format!("order {} was canceled", order.id);
                return self.terminate(session, CheckoutStatus::Failed, reason, "business").await;
            }
            Ok(None) => {
                let request = OrderRequest {
                    session_id: session.id,
                    user_id: session.user_id,
                    items: session.items.clone(),
                    total: session.total,
                    currency: session.currency.clone(),
                };
                let created = self.call(
                    STEP_CREATE_ORDER,
                    &self.breakers.order,
                    self.config.order_timeout,
                    self.orders.create_pending(&request),
                );
                match created.await {
                    Ok(order_id) => order_id,
                    Err(e) => return self.fail_step(session, e).await,
                }
            }
            Err(e) => return self.fail_step(session, e).await,
        };

        session.order_id = Some(order_id);
        session.status = CheckoutStatus::PaymentPending;
        self.persist(session).await
    }

    async fn charge_payment(&self, mut session: CheckoutSession) -> Result<CheckoutSession> {
        if let Some(interrupt) = self.checkpoint(&mut session).await? {
            return self.interrupted(session, interrupt).await;
        }

        session.status = CheckoutStatus::PaymentProcessing;
        let session = self.persist(session).await?;
        if session.total.is_zero() {
            tracing::info!("nothing to charge");
            return self.complete(session).await;
        }
        self.send_charge(session).await
    }

    async fn confirm_payment(&self, mut session: CheckoutSession) -> Result<CheckoutSession> {
        if let Some(interrupt) = self.checkpoint(&mut session).await? {
            return self.interrupted(session, interrupt).await;
        }
        if session.total.is_zero() {
            return self.complete(session).await;
        }

        let key = session.idempotency_key();
        let lookup = self.call(
            STEP_CONFIRM_PAYMENT,
            &self.breakers.payment,
            self.config.payment_timeout,
            self.payments.find_by_key(&key),
        );
        match lookup.await {
            Ok(Some(payment)) => self.settle(session, payment).await,
            // The charge never reached the payment service
            Ok(None) => self.send_charge(session).await,
            Err(e) => self.fail_step(session, e).await,
        }
    }

    async fn send_charge(&self, session: CheckoutSession) -> Result<CheckoutSession> {
        let request = ChargeRequest {
            idempotency_key: session.idempotency_key(),
            checkout_id: session.id,
            order_id: session.order_id,
            amount: session.total,
            currency: session.currency.clone(),
            method: session.payment_method,
        };
        let charged = self.call(
            STEP_CHARGE_PAYMENT,
            &self.breakers.payment,
            self.config.payment_timeout,
            self.payments.charge(request),
        );
        match charged.await {
            Ok(payment) => self.settle(session, payment).await,
            Err(e) => self.fail_step(session, e).await,
        }
    }

    /// Acts on the payment's recorded outcome.
    async fn settle(&self, mut session: CheckoutSession, payment: Payment) -> Result<CheckoutSession> {
        let known = session.payment_id == Some(payment.id);
        session.payment_id = Some(payment.id);

        match payment.status {
            PaymentStatus::Succeeded | PaymentStatus::PartiallyRefunded => self.complete(session).await,
            PaymentStatus::Pending | PaymentStatus::Processing => {
                tracing::info!(payment_id = %payment.id, "payment outcome pending");
                if known {
                    Ok(session)
                } else {
                    self.persist(session).await
                }
            }
            PaymentStatus::Failed => {
                let reason = format!(
                    "payment declined: {}",
                    payment.failure_reason.as_deref().unwrap_or("no reason given")
                );
                self.terminate(session, CheckoutStatus::Failed, reason, "business").await
            }
            PaymentStatus::Canceled | PaymentStatus::Refunding | PaymentStatus::Refunded => {
                let reason = format!("payment {}", payment.status);
                self.terminate(session, CheckoutStatus::Failed, reason, "business").await
            }
        }
    }

    /// Commits every reservation and marks the session completed.
    ///
    /// Reservations that cannot be committed after retries fail the session
    /// with full compensation, refund included.
    async fn complete(&self, mut session: CheckoutSession) -> Result<CheckoutSession> {
        let mut failures = Vec::new();
        for id in session.reservation_ids().collect::<Vec<_>>() {
            let inventory = &self.inventory;
            let committed = self
                .undo("commit_reservation", "inventory", self.config.inventory_timeout, || {
                    inventory.commit(id)
                })
                .await;
            if let Err(e) = committed {
                failures.push(e);
            }
        }
        if !failures.is_empty() {
            let reason = format!("could not commit reservations: {}", failures.join("; "));
            return self
                .terminate(session, CheckoutStatus::Failed, reason, "transient")
                .await;
        }

        session.status = CheckoutStatus::Completed;
        session.failure_reason = None;
        let session = self.persist(session).await?;

        metrics::counter!("checkout_sessions_completed_total").increment(1);
        tracing::info!(order_id = ?session.order_id, payment_id = ?session.payment_id, "checkout completed");
        self.emit(topics::CHECKOUT_COMPLETED, &session, &CheckoutCompleted::from(&session))
            .await;
        Ok(session)
    }

    async fn expire_session(&self, session: CheckoutSession) -> Result<CheckoutSession> {
        if session.status == CheckoutStatus::PaymentProcessing {
            let key = session.idempotency_key();
            let payments = &self.payments;
            let found = self
                .undo("find_payment", "payment", self.config.payment_timeout, || {
                    payments.find_by_key(&key)
                })
                .await;
            if let Ok(Some(payment)) = found
                && payment.status.is_captured()
            {
                tracing::info!(payment_id = %payment.id, "payment captured before deadline, completing");
                let mut session = session;
                session.payment_id = Some(payment.id);
                return self.complete(session).await;
            }
        }
        self.terminate(
            session,
            CheckoutStatus::Expired,
            "session expired".to_string(),
            "expired",
        )
        .await
    }

    async fn interrupted(&self, session: CheckoutSession, interrupt: Interrupt) -> Result<CheckoutSession> {
        match interrupt {
            Interrupt::Expired => self.expire_session(session).await,
            Interrupt::Canceled(reason) => {
                self.terminate(
                    session,
                    CheckoutStatus::Failed,
                    format!("canceled: {reason}"),
                    "canceled",
                )
                .await
            }
        }
    }

    async fn fail_step(&self, session: CheckoutSession, error: CheckoutError) -> Result<CheckoutSession> {
        let kind = error.kind();
        self.terminate(session, CheckoutStatus::Failed, error.to_string(), kind)
            .await
    }

    /// Ends the session in `status` and compensates.
    ///
    /// The terminal status is persisted first with `reconciliation_required`
    /// set, so a crash mid-compensation leaves the session for the sweeper.
    async fn terminate(
        &self,
        mut session: CheckoutSession,
        status: CheckoutStatus,
        reason: String,
        kind: &'static str,
    ) -> Result<CheckoutSession> {
        let id = session.id;
        let reached = session.status;
        tracing::warn!(from = %reached, to = %status, %reason, kind, "checkout failed, compensating");

        session.status = status;
        session.failure_reason = Some(reason);
        session.reconciliation_required = true;
        let mut session = self.persist(session).await?;

        let errors = self.compensate(&session, reached).await;
        self.record_compensation(&mut session, errors);
        let session = match self.persist(session).await {
            Ok(saved) => saved,
            // A concurrent reconcile finished the job
            Err(CheckoutError::Conflict { .. }) => self.get_session(id).await?,
            Err(e) => return Err(e),
        };

        if status == CheckoutStatus::Expired {
            metrics::counter!("checkout_sessions_expired_total").increment(1);
        } else {
            metrics::counter!("checkout_sessions_failed_total", "kind" => kind).increment(1);
        }
        self.emit(topics::CHECKOUT_FAILED, &session, &CheckoutFailed::new(&session, kind))
            .await;
        Ok(session)
    }

    // Compensation

    /// Undoes what a session reached, newest first: payment, order,
    /// reservations in reverse item order. Returns one message per
    /// compensation that still failed after retries.
    async fn compensate(&self, session: &CheckoutSession, reached: CheckoutStatus) -> Vec<String> {
        let mut errors = Vec::new();

        if reached == CheckoutStatus::PaymentProcessing
            && let Err(e) = self.undo_payment(session).await
        {
            errors.push(e);
        }
        if reached != CheckoutStatus::Initiated
            && let Err(e) = self.undo_order(session).await
        {
            errors.push(e);
        }
        for id in session.reservation_ids().rev() {
            if let Err(e) = self.release_reservation(id).await {
                errors.push(e);
            }
        }
        errors
    }

    async fn undo_payment(&self, session: &CheckoutSession) -> std::result::Result<(), String> {
        let key = session.idempotency_key();
        let payments = &self.payments;
        let timeout = self.config.payment_timeout;

        let found = self
            .undo("find_payment", "payment", timeout, || payments.find_by_key(&key))
            .await?;
        let Some(payment) = found else {
            return Ok(());
        };
        let id = payment.id;

        if payment.status.holds_funds() {
            self.undo("refund_payment", "payment", timeout, || payments.refund(id))
                .await?;
            tracing::warn!(payment_id = %id, "payment refunded");
        } else if payment.status.is_in_flight() {
            self.undo("cancel_payment", "payment", timeout, || payments.cancel(id))
                .await?;
            tracing::warn!(payment_id = %id, "payment canceled");
        }
        Ok(())
    }

    async fn undo_order(&self, session: &CheckoutSession) -> std::result::Result<(), String> {
        let orders = &self.orders;
        let timeout = self.config.order_timeout;
        let session_id = session.id;
        let reason = session.failure_reason.as_deref().unwrap_or("checkout failed");

        let order_id = match session.order_id {
            Some(order_id) => Some(order_id),
            None => self
                .undo("find_order", "order", timeout, || orders.find_by_checkout(session_id))
                .await?
                .map(|order| order.id),
        };
        let Some(order_id) = order_id else {
            return Ok(());
        };

        self.undo("cancel_order", "order", timeout, || async move {
            match orders.cancel(order_id, reason).await {
                Err(ServiceError::NotFound(_)) => Ok(()),
                other => other,
            }
        })
        .await?;
        tracing::warn!(%order_id, "order canceled");
        Ok(())
    }

    async fn release_reservation(&self, id: ReservationId) -> std::result::Result<(), String> {
        let inventory = &self.inventory;
        self.undo("release_reservation", "inventory", self.config.inventory_timeout, || async move {
            match inventory.release(id).await {
                Err(ServiceError::NotFound(_)) => Ok(()),
                other => other,
            }
        })
        .await?;
        tracing::warn!(reservation_id = %id, "reservation released");
        Ok(())
    }

    fn record_compensation(&self, session: &mut CheckoutSession, errors: Vec<String>) {
        if errors.is_empty() {
            session.reconciliation_required = false;
            session.compensation_errors.clear();
            return;
        }
        metrics::counter!("checkout_compensation_failures_total").increment(1);
        tracing::error!(
            session_id = %session.id,
            status = %session.status,
            ?errors,
            "fatal reconciliation case: compensation failed after retries"
        );
        session.reconciliation_required = true;
        session.compensation_errors = errors;
    }

    // Plumbing

    /// A forward call: breaker, then step timeout.
    async fn call<T, F>(
        &self,
        step: &'static str,
        breaker: &Arc<dyn Breaker>,
        timeout: Duration,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ServiceError>>,
    {
        guarded(breaker.as_ref(), timeout, ServiceError::is_failure, fut)
            .await
            .map_err(|e| step_error(step, e))
    }

    /// A compensating call: bounded retry around a timeout, no breaker.
    async fn undo<T, F, Fut>(
        &self,
        operation: &'static str,
        target: &str,
        timeout: Duration,
        op: F,
    ) -> std::result::Result<T, String>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, ServiceError>>,
    {
        retry(&self.config.compensation, operation, |_| timed(target, timeout, op()))
            .await
            .map_err(|e| format!("{operation}: {e}"))
    }

    /// Reloads the session and reports expiry or a cancellation request.
    ///
    /// Fails with `Conflict` if another writer saved the session since it
    /// was loaded.
    async fn checkpoint(&self, session: &mut CheckoutSession) -> Result<Option<Interrupt>> {
        let stored = self.get_session(session.id).await?;
        if stored.version != session.version {
            return Err(CheckoutError::Conflict {
                id: session.id,
                expected: session.version,
            });
        }
        session.cancel_requested = stored.cancel_requested;

        if session.is_expired_at(self.clock.now()) {
            return Ok(Some(Interrupt::Expired));
        }
        Ok(session.cancel_requested.clone().map(Interrupt::Canceled))
    }

    async fn persist(&self, mut session: CheckoutSession) -> Result<CheckoutSession> {
        session.updated_at = self.clock.now();
        self.store.save(&session).await.map_err(|e| match e {
            StoreError::Conflict { id, expected, .. } => CheckoutError::Conflict { id, expected },
            StoreError::NotFound(id) => CheckoutError::NotFound(id),
            other => CheckoutError::Store(other),
        })
    }

    /// Publishes at the stored record version plus one: `started` goes out at
    /// 1 and every later event follows at least one more save.
    async fn emit<P: Serialize>(&self, topic: Topic, session: &CheckoutSession, payload: &P) {
        let ctx = PublishContext::new(session.correlation_id.as_str(), session.user_id.to_string());
        let version = Version::new(session.version + 1);
        if let Err(e) = self
            .publisher
            .publish_at(topic, &session.id.to_string(), AGGREGATE_TYPE, version, payload, &ctx)
            .await
        {
            tracing::error!(session_id = %session.id, error = %e, "failed to publish checkout event");
        }
    }
}

fn step_error(step: &'static str, error: CallError<ServiceError>) -> CheckoutError {
    match error {
        CallError::BreakerOpen { target } => CheckoutError::BreakerOpen { step, target },
        CallError::Timeout { after, .. } => CheckoutError::DownstreamTimeout { step, after },
        CallError::Inner(ServiceError::Unavailable(reason)) => CheckoutError::Downstream { step, reason },
        CallError::Inner(ServiceError::Rejected(reason) | ServiceError::NotFound(reason)) => {
            CheckoutError::StepRejected { step, reason }
        }
    }
}
