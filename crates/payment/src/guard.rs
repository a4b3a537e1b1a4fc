//! Idempotent charging.

use std::sync::Arc;

use common::{Clock, Money, PaymentId};
use event_bus::{EventPublisher, PublishContext, Topic, topics};
use serde::Serialize;

use crate::error::{PaymentError, Result};
use crate::events::{AGGREGATE_TYPE, PaymentFailed, PaymentRefunded, PaymentSucceeded};
use crate::gateway::{GatewayOutcome, PaymentGateway};
use crate::repository::{Expected, PaymentRepository};
use crate::types::{ChargeRequest, Payment, PaymentStatus};

/// Deduplicates charges by idempotency key.
///
/// A key is claimed by inserting a `pending` row. Whoever loses the insert
/// race returns the winner's row instead of charging again. Refunds are
/// claimed the same way: a conditional move to `refunding` comes before the
/// gateway call, and the gateway deduplicates on the refund key.
#[derive(Clone)]
pub struct PaymentGuard {
    repository: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
}

impl PaymentGuard {
    pub fn new(
        repository: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            repository,
            gateway,
            clock,
            publisher,
        }
    }

    /// Charges at most once per idempotency key.
    ///
    /// An existing payment for the key is returned unchanged whatever its
    /// status. A declined charge is an `Ok` payment in status `failed`.
    #[tracing::instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key, amount = %request.amount))]
    pub async fn charge(&self, request: ChargeRequest) -> Result<Payment> {
        if request.idempotency_key.trim().is_empty() {
            return Err(PaymentError::Validation("idempotency key is required".to_string()));
        }
        if !request.amount.is_positive() {
            return Err(PaymentError::Validation(format!(
                "charge amount must be positive, got {}",
                request.amount
            )));
        }

        if let Some(existing) = self.repository.find_by_key(&request.idempotency_key).await? {
            metrics::counter!("payment_charges_total", "outcome" => "duplicate").increment(1);
            tracing::info!(payment_id = %existing.id, status = %existing.status, "returning existing payment");
            return Ok(existing);
        }

        let now = self.clock.now();
        let mut payment = Payment {
            id: PaymentId::new(),
            checkout_id: request.checkout_id,
            order_id: request.order_id,
            amount: request.amount,
            currency: request.currency,
            method: request.method,
            status: PaymentStatus::Pending,
            idempotency_key: Some(request.idempotency_key.clone()),
            refunded_amount: Money::zero(),
            pending_refund: Money::zero(),
            gateway_reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        match self.repository.insert(&payment).await {
            Ok(()) => {}
            Err(PaymentError::Conflict(key)) => {
                metrics::counter!("payment_charges_total", "outcome" => "duplicate").increment(1);
                tracing::info!("lost idempotency race, returning winner");
                let winner = self.repository.find_by_key(&key).await?;
                return winner.ok_or(PaymentError::Conflict(key));
            }
            Err(e) => return Err(e),
        }

        payment.status = PaymentStatus::Processing;
        payment.updated_at = self.clock.now();
        let claimed = Expected::unrefunded(PaymentStatus::Pending);
        if !self.repository.update(&payment, claimed).await? {
            return self.reload(payment.id).await;
        }

        let outcome = match self.gateway.charge(&payment).await {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::counter!("payment_charges_total", "outcome" => "error").increment(1);
                tracing::warn!(payment_id = %payment.id, error = %e, "gateway call failed, payment left processing");
                return Err(e.into());
            }
        };

        payment.updated_at = self.clock.now();
        let outcome_label = match outcome {
            GatewayOutcome::Approved { reference } => {
                payment.status = PaymentStatus::Succeeded;
                payment.gateway_reference = Some(reference);
                "succeeded"
            }
            GatewayOutcome::Declined { reason } => {
                payment.status = PaymentStatus::Failed;
                payment.failure_reason = Some(reason);
                "declined"
            }
        };

        let in_flight = Expected::unrefunded(PaymentStatus::Processing);
        if !self.repository.update(&payment, in_flight).await? {
            let stored = self.reload(payment.id).await?;
            if payment.status == PaymentStatus::Succeeded && stored.status == PaymentStatus::Canceled {
                return self.refund_late_capture(payment).await;
            }
            tracing::warn!(
                payment_id = %payment.id,
                gateway_status = %payment.status,
                stored_status = %stored.status,
                "gateway settled a payment that was moved concurrently"
            );
            return Ok(stored);
        }

        metrics::counter!("payment_charges_total", "outcome" => outcome_label).increment(1);
        tracing::info!(payment_id = %payment.id, status = %payment.status, "charge settled");

        match payment.status {
            PaymentStatus::Succeeded => self.emit_succeeded(&payment).await,
            _ => {
                self.emit(
                    topics::PAYMENT_FAILED,
                    &payment,
                    &PaymentFailed {
                        payment_id: payment.id,
                        checkout_id: payment.checkout_id,
                        reason: payment.failure_reason.clone().unwrap_or_default(),
                    },
                )
                .await
            }
        }

        Ok(payment)
    }

    /// Refunds `amount`, or everything still refundable when `None`.
    ///
    /// A fully refunded payment is returned unchanged. A refund already in
    /// flight is finished instead of starting a new one, so concurrent and
    /// retried calls pay out once.
    #[tracing::instrument(skip(self, id), fields(payment_id = %id))]
    pub async fn refund(&self, id: PaymentId, amount: Option<Money>) -> Result<Payment> {
        let mut payment = self.reload(id).await?;

        loop {
            match payment.status {
                PaymentStatus::Refunded => return Ok(payment),
                PaymentStatus::Refunding => break,
                PaymentStatus::Succeeded | PaymentStatus::PartiallyRefunded => {}
                status => {
                    return Err(PaymentError::InvalidTransition {
                        id,
                        status,
                        action: "refund",
                    });
                }
            }

            let refundable = payment.refundable();
            let requested = amount.unwrap_or(refundable);
            if !requested.is_positive() || requested > refundable {
                return Err(PaymentError::Validation(format!(
                    "refund of {requested} outside refundable {refundable}"
                )));
            }

            let expected = Expected::of(&payment);
            let mut claimed = payment.clone();
            claimed.status = PaymentStatus::Refunding;
            claimed.pending_refund = requested;
            claimed.updated_at = self.clock.now();
            if self.repository.update(&claimed, expected).await? {
                payment = claimed;
                break;
            }
            payment = self.reload(id).await?;
        }

        let amount = payment.pending_refund;
        // On error the claim stays; the next call resumes it with the same key
        self.gateway.refund(&payment, amount, &payment.refund_key()).await?;

        let expected = Expected::of(&payment);
        payment.refunded_amount += amount;
        payment.pending_refund = Money::zero();
        payment.status = if payment.refunded_amount == payment.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        payment.updated_at = self.clock.now();

        if !self.repository.update(&payment, expected).await? {
            return self.reload(id).await;
        }

        tracing::info!(%amount, status = %payment.status, "payment refunded");
        self.emit(
            topics::PAYMENT_REFUNDED,
            &payment,
            &PaymentRefunded {
                payment_id: payment.id,
                checkout_id: payment.checkout_id,
                amount,
                total_refunded: payment.refunded_amount,
                full: payment.status == PaymentStatus::Refunded,
            },
        )
        .await;
        Ok(payment)
    }

    /// Cancels a payment that has not settled. Canceling twice is a no-op.
    ///
    /// If a gateway call for the payment is still outstanding and captures
    /// afterwards, the charging task records the capture and refunds it.
    #[tracing::instrument(skip(self, id), fields(payment_id = %id))]
    pub async fn cancel(&self, id: PaymentId) -> Result<Payment> {
        let mut payment = self.reload(id).await?;
        let expected = payment.status;

        match expected {
            PaymentStatus::Canceled => return Ok(payment),
            PaymentStatus::Pending | PaymentStatus::Processing => {}
            status => {
                return Err(PaymentError::InvalidTransition {
                    id,
                    status,
                    action: "cancel",
                });
            }
        }

        payment.status = PaymentStatus::Canceled;
        payment.updated_at = self.clock.now();
        if !self.repository.update(&payment, Expected::unrefunded(expected)).await? {
            return self.reload(id).await;
        }
        tracing::info!("payment canceled");
        Ok(payment)
    }

    pub async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Payment>> {
        self.repository.find_by_key(idempotency_key).await
    }

    pub async fn get(&self, id: PaymentId) -> Result<Payment> {
        self.reload(id).await
    }

    /// Records a capture that landed after the payment was canceled, then
    /// returns the money.
    async fn refund_late_capture(&self, payment: Payment) -> Result<Payment> {
        metrics::counter!("payment_charges_total", "outcome" => "captured_after_cancel").increment(1);
        tracing::warn!(payment_id = %payment.id, "gateway captured a canceled payment, refunding");

        let canceled = Expected::unrefunded(PaymentStatus::Canceled);
        if !self.repository.update(&payment, canceled).await? {
            return self.reload(payment.id).await;
        }
        self.emit_succeeded(&payment).await;
        self.refund(payment.id, None).await
    }

    async fn emit_succeeded(&self, payment: &Payment) {
        self.emit(
            topics::PAYMENT_SUCCEEDED,
            payment,
            &PaymentSucceeded {
                payment_id: payment.id,
                checkout_id: payment.checkout_id,
                order_id: payment.order_id,
                amount: payment.amount,
                currency: payment.currency.clone(),
                gateway_reference: payment.gateway_reference.clone(),
            },
        )
        .await
    }

    async fn reload(&self, id: PaymentId) -> Result<Payment> {
        self.repository
            .get(id)
            .await?
            .ok_or(PaymentError::NotFound(id))
    }

    async fn emit<P: Serialize>(&self, topic: Topic, payment: &Payment, payload: &P) {
        let ctx = PublishContext {
            correlation_id: Some(payment.checkout_id.to_string()),
            ..PublishContext::default()
        };
        if let Err(e) = self
            .publisher
            .publish(topic, &payment.id.to_string(), AGGREGATE_TYPE, payload, &ctx)
            .await
        {
            tracing::error!(payment_id = %payment.id, error = %e, "failed to publish payment event");
        }
    }
}
