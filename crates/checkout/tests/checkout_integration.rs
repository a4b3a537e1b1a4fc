//! Integration tests for the checkout saga.

use std::sync::Arc;
use std::time::Duration;

use checkout::{
    CheckoutConfig, CheckoutError, CheckoutItem, CheckoutOrchestrator, CheckoutStatus,
    ExpirationSweeper, InMemoryOrderService, InMemorySessionStore, SessionStore, StartCheckout,
};
use chrono::Utc;
use common::{Clock, ManualClock, Money, UserId};
use event_bus::{EventPublisher, InMemoryBroker, topics};
use inventory::{AdjustmentReason, InMemoryStockStore, ReservationManager, ReservationStatus};
use payment::{
    ChargeRequest, InMemoryGateway, InMemoryPaymentRepository, PaymentGuard, PaymentRepository,
    PaymentStatus,
};
use resilience::{Breaker, BreakerConfig, BreakerState, RetryPolicy};

struct TestHarness {
    orchestrator: CheckoutOrchestrator,
    sweeper: ExpirationSweeper,
    clock: Arc<ManualClock>,
    broker: InMemoryBroker,
    sessions: InMemorySessionStore,
    stock: InMemoryStockStore,
    reservations: ReservationManager,
    payments: InMemoryPaymentRepository,
    gateway: InMemoryGateway,
    guard: PaymentGuard,
    orders: InMemoryOrderService,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_config(CheckoutConfig {
            inventory_timeout: Duration::from_secs(1),
            order_timeout: Duration::from_secs(1),
            payment_timeout: Duration::from_secs(2),
            compensation: RetryPolicy::new(2, Duration::from_millis(10)),
            ..CheckoutConfig::default()
        })
        .await
    }

    async fn with_config(config: CheckoutConfig) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let broker = InMemoryBroker::new();
        let publisher = |source: &str| {
            EventPublisher::new(
                Arc::new(broker.clone()),
                source,
                RetryPolicy::new(2, Duration::from_millis(1)),
            )
        };

        let stock = InMemoryStockStore::new();
        let reservations = ReservationManager::new(
            Arc::new(stock.clone()),
            clock.clone(),
            publisher("inventory-service"),
        );
        for (product, on_hand) in [("SKU-001", 10), ("SKU-002", 5)] {
            reservations
                .adjust_quantity(
                    product.into(),
                    "default".into(),
                    on_hand,
                    AdjustmentReason::Restock,
                    None,
                )
                .await
                .unwrap();
        }

        let payments = InMemoryPaymentRepository::new();
        let gateway = InMemoryGateway::new();
        let guard = PaymentGuard::new(
            Arc::new(payments.clone()),
            Arc::new(gateway.clone()),
            clock.clone(),
            publisher("payment-service"),
        );
        let orders = InMemoryOrderService::new().with_publisher(publisher("order-service"));
        let sessions = InMemorySessionStore::new();

        let orchestrator = CheckoutOrchestrator::new(
            Arc::new(sessions.clone()),
            Arc::new(reservations.clone()),
            Arc::new(orders.clone()),
            Arc::new(guard.clone()),
            clock.clone(),
            publisher("checkout-service"),
            config,
        );
        let sweeper = ExpirationSweeper::new(orchestrator.clone(), reservations.clone());

        Self {
            orchestrator,
            sweeper,
            clock,
            broker,
            sessions,
            stock,
            reservations,
            payments,
            gateway,
            guard,
            orders,
        }
    }

    fn command(&self) -> StartCheckout {
        StartCheckout::new(
            UserId::new(),
            vec![
                CheckoutItem::new("SKU-001", "default", Money::from_minor(2_500), 2),
                CheckoutItem::new("SKU-002", "default", Money::from_minor(5_000), 1),
            ],
        )
        .with_discount(Money::from_minor(1_000))
        .with_shipping(Money::from_minor(500))
    }

    async fn available(&self, product: &str) -> i64 {
        self.reservations
            .get_stock(&product.into(), &"default".into())
            .await
            .unwrap()
            .available()
    }

    fn published(&self, topic: event_bus::Topic) -> usize {
        self.broker.count(&topic.name())
    }
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_completes_and_commits_stock() {
    let h = TestHarness::new().await;
    let session = h.orchestrator.start_checkout(h.command()).await.unwrap();
    assert_eq!(session.total, Money::from_minor(9_500));

    let session = h.orchestrator.run_to_completion(session.id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Completed);
    assert!(session.failure_reason.is_none());
    assert!(session.order_id.is_some());
    assert!(!session.reconciliation_required);

    let payment = h.payments.get(session.payment_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert_eq!(payment.amount, Money::from_minor(9_500));
    assert_eq!(h.gateway.charge_count(), 1);

    let stock = h
        .reservations
        .get_stock(&"SKU-001".into(), &"default".into())
        .await
        .unwrap();
    assert_eq!((stock.total, stock.reserved, stock.sold), (8, 0, 2));
    assert_eq!(h.stock.active_count().await, 0);
    assert_eq!(h.orders.open_orders(), 1);

    assert_eq!(h.published(topics::CHECKOUT_STARTED), 1);
    assert_eq!(h.published(topics::CHECKOUT_COMPLETED), 1);
    assert_eq!(h.published(topics::CHECKOUT_FAILED), 0);
    assert_eq!(h.published(topics::INVENTORY_RESERVED), 2);

    let completed = &h.broker.published(&topics::CHECKOUT_COMPLETED.name())[0];
    assert_eq!(completed.correlation_id, session.correlation_id);
    assert_eq!(completed.aggregate_id, session.id.to_string());

    // envelope versions follow the stored record, not a process-local counter
    let started = &h.broker.published(&topics::CHECKOUT_STARTED.name())[0];
    assert_eq!(started.version.as_i64(), 1);
    assert_eq!(completed.version.as_i64(), session.version + 1);
}

#[tokio::test(start_paused = true)]
async fn test_steps_advance_one_status_at_a_time() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;

    let expected = [
        CheckoutStatus::ItemsReserved,
        CheckoutStatus::PaymentPending,
        CheckoutStatus::Completed,
    ];
    for status in expected {
        assert_eq!(h.orchestrator.advance(id).await.unwrap().status, status);
    }
}

#[tokio::test(start_paused = true)]
async fn test_payment_decline_leaves_no_holds_and_no_open_order() {
    let h = TestHarness::new().await;
    h.gateway.set_decline(Some("insufficient funds"));
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;

    let session = h.orchestrator.run_to_completion(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Failed);
    assert!(session.failure_reason.as_deref().unwrap().contains("insufficient funds"));
    assert!(!session.reconciliation_required);
    assert_eq!(h.stock.active_count().await, 0);
    assert_eq!(h.available("SKU-001").await, 10);
    assert_eq!(h.available("SKU-002").await, 5);
    assert_eq!(h.orders.order_count(), 1);
    assert_eq!(h.orders.open_orders(), 0);
    assert_eq!(h.published(topics::CHECKOUT_FAILED), 1);
    assert_eq!(h.published(topics::ORDER_CANCELED), 1);
    assert_eq!(h.published(topics::INVENTORY_RELEASED), 2);

    let failed = &h.broker.published(&topics::CHECKOUT_FAILED.name())[0];
    assert_eq!(failed.data["kind"], "business");
    assert_eq!(failed.data["status"], "failed");
}

#[tokio::test(start_paused = true)]
async fn test_advance_on_terminal_session_is_a_noop() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    let completed = h.orchestrator.run_to_completion(id).await.unwrap();

    let first = h.orchestrator.advance(id).await.unwrap();
    let second = h.orchestrator.advance(id).await.unwrap();

    assert_eq!(first, completed);
    assert_eq!(second, completed);
    assert_eq!(h.gateway.charge_count(), 1);
    assert_eq!(h.published(topics::CHECKOUT_COMPLETED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_stock_releases_earlier_items() {
    let h = TestHarness::new().await;
    let command = StartCheckout::new(
        UserId::new(),
        vec![
            CheckoutItem::new("SKU-001", "default", Money::from_minor(100), 3),
            CheckoutItem::new("SKU-002", "default", Money::from_minor(100), 6),
        ],
    );
    let id = h.orchestrator.start_checkout(command).await.unwrap().id;

    let session = h.orchestrator.advance(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Failed);
    assert!(
        session
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("Insufficient stock")
    );
    assert_eq!(h.stock.active_count().await, 0);
    assert_eq!(h.available("SKU-001").await, 10);
    assert_eq!(h.orders.create_calls(), 0);
    assert_eq!(h.gateway.charge_count(), 0);
    assert_eq!(
        h.orchestrator.breakers().inventory.state(),
        BreakerState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_validation_rejects_before_any_side_effect() {
    let h = TestHarness::new().await;
    let err = h
        .orchestrator
        .start_checkout(StartCheckout::new(UserId::new(), vec![]))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::Validation(_)));
    assert!(h.sessions.is_empty());
    assert_eq!(h.published(topics::CHECKOUT_STARTED), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_items_reserved_session_is_swept() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    let session = h.orchestrator.advance(id).await.unwrap();
    assert_eq!(session.status, CheckoutStatus::ItemsReserved);
    let reservation_id = session.items[0].reservation_id.unwrap();

    h.clock.advance(chrono::Duration::minutes(16));
    let report = h.sweeper.run_once().await;

    assert_eq!(report.sessions_expired, 1);
    let session = h.orchestrator.get_session(id).await.unwrap();
    assert_eq!(session.status, CheckoutStatus::Expired);
    assert_eq!(session.failure_reason.as_deref(), Some("session expired"));

    let reservation = h.reservations.get_reservation(reservation_id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Released);
    assert_eq!(h.available("SKU-001").await, 10);

    let failed = &h.broker.published(&topics::CHECKOUT_FAILED.name())[0];
    assert_eq!(failed.data["status"], "expired");
}

#[tokio::test(start_paused = true)]
async fn test_advance_expires_overdue_session() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    h.orchestrator.advance(id).await.unwrap();

    h.clock.advance(chrono::Duration::minutes(16));
    let session = h.orchestrator.advance(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Expired);
    assert_eq!(h.orders.create_calls(), 0);
    assert_eq!(h.stock.active_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_lapsed_reservation_without_session_is_released_by_sweep() {
    let h = TestHarness::new().await;
    let reservation = h
        .reservations
        .reserve(
            inventory::ReserveRequest::new("SKU-002", "default", 5)
                .with_ttl(chrono::Duration::minutes(1)),
        )
        .await
        .unwrap();

    h.clock.advance(chrono::Duration::minutes(2));
    let report = h.sweeper.run_once().await;

    assert_eq!(report.reservations_released, 1);
    let reservation = h.reservations.get_reservation(reservation.id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Released);
    assert_eq!(h.available("SKU-002").await, 5);
}

#[tokio::test(start_paused = true)]
async fn test_open_order_breaker_short_circuits_without_calling_the_service() {
    let h = TestHarness::with_config(CheckoutConfig {
        order_timeout: Duration::from_secs(1),
        compensation: RetryPolicy::new(2, Duration::from_millis(10)),
        breaker: BreakerConfig {
            failure_ratio: 0.4,
            ..BreakerConfig::default()
        },
        ..CheckoutConfig::default()
    })
    .await;
    h.orders.set_fail_on_create(true);

    // Each run records one lookup success and one create failure; the
    // third failure makes 3 of 6, above the 0.4 ratio.
    for _ in 0..3 {
        let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
        let session = h.orchestrator.run_to_completion(id).await.unwrap();
        assert_eq!(session.status, CheckoutStatus::Failed);
        assert!(session.failure_reason.as_deref().unwrap().contains("unavailable"));
    }
    assert_eq!(h.orchestrator.breakers().order.state(), BreakerState::Open);
    assert_eq!(h.orders.create_calls(), 3);

    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    let session = h.orchestrator.run_to_completion(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Failed);
    assert!(session.failure_reason.as_deref().unwrap().contains("breaker open"));
    assert_eq!(h.orders.create_calls(), 3);
    // Compensation bypasses the breaker
    assert_eq!(h.stock.active_count().await, 0);
    assert!(!session.reconciliation_required);
}

#[tokio::test(start_paused = true)]
async fn test_payment_timeout_cancels_in_flight_payment() {
    let h = TestHarness::new().await;
    h.gateway.set_latency(Some(Duration::from_secs(30)));
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;

    let session = h.orchestrator.run_to_completion(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Failed);
    assert!(session.failure_reason.as_deref().unwrap().contains("timed out"));

    let payment = h
        .payments
        .find_by_key(&session.idempotency_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Canceled);
    assert_eq!(h.stock.active_count().await, 0);
    assert_eq!(h.orders.open_orders(), 0);

    let failed = &h.broker.published(&topics::CHECKOUT_FAILED.name())[0];
    assert_eq!(failed.data["kind"], "transient");
}

#[tokio::test(start_paused = true)]
async fn test_reentry_after_crash_reuses_existing_order() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    h.orchestrator.advance(id).await.unwrap();

    // The order is created but the session never records it
    h.sessions.set_fail_next_saves(1);
    let err = h.orchestrator.advance(id).await.unwrap_err();
    assert_eq!(err.kind(), "internal");
    assert_eq!(
        h.orchestrator.get_session(id).await.unwrap().status,
        CheckoutStatus::ItemsReserved
    );

    let session = h.orchestrator.run_to_completion(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Completed);
    assert_eq!(h.orders.order_count(), 1);
    assert_eq!(h.orders.create_calls(), 1);
    assert_eq!(h.gateway.charge_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_releases_reservation_just_taken() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;

    h.sessions.set_fail_next_saves(1);
    assert!(h.orchestrator.advance(id).await.is_err());
    assert_eq!(h.stock.active_count().await, 0);
    assert_eq!(h.available("SKU-001").await, 10);

    let session = h.orchestrator.run_to_completion(id).await.unwrap();
    assert_eq!(session.status, CheckoutStatus::Completed);
    assert_eq!(h.available("SKU-001").await, 8);
}

#[tokio::test(start_paused = true)]
async fn test_reentry_revalidates_existing_reservations() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    let reserved = h.orchestrator.advance(id).await.unwrap();
    let first = reserved.items[0].reservation_id.unwrap();
    let second = reserved.items[1].reservation_id.unwrap();

    // Crash before the status change: both items hold stock, status is stale
    let mut stale = reserved.clone();
    stale.status = CheckoutStatus::Initiated;
    h.sessions.put(stale);
    h.reservations.release(second).await.unwrap();

    let session = h.orchestrator.advance(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::ItemsReserved);
    assert_eq!(session.items[0].reservation_id, Some(first));
    assert_ne!(session.items[1].reservation_id, Some(second));
    assert_eq!(h.stock.active_count().await, 2);
    assert_eq!(h.available("SKU-001").await, 8);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_compensates_and_fails_session() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    h.orchestrator.advance(id).await.unwrap();
    h.orchestrator.advance(id).await.unwrap();

    let session = h
        .orchestrator
        .request_cancel(id, "customer changed their mind")
        .await
        .unwrap();

    assert_eq!(session.status, CheckoutStatus::Failed);
    assert_eq!(
        session.failure_reason.as_deref(),
        Some("canceled: customer changed their mind")
    );
    assert_eq!(h.stock.active_count().await, 0);
    assert_eq!(h.orders.open_orders(), 0);
    assert_eq!(h.gateway.charge_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_completion_changes_nothing() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    let completed = h.orchestrator.run_to_completion(id).await.unwrap();

    let session = h.orchestrator.request_cancel(id, "too late").await.unwrap();

    assert_eq!(session, completed);
    assert_eq!(h.gateway.refunded_total(), Money::zero());
}

#[tokio::test(start_paused = true)]
async fn test_persistent_compensation_failure_flags_and_reconciles() {
    let h = TestHarness::new().await;
    h.gateway.set_decline(Some("card expired"));
    h.orders.set_fail_on_cancel(true);
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;

    let session = h.orchestrator.run_to_completion(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Failed);
    assert!(session.reconciliation_required);
    assert_eq!(session.compensation_errors.len(), 1);
    assert!(session.compensation_errors[0].starts_with("cancel_order"));
    // Later compensations still ran
    assert_eq!(h.stock.active_count().await, 0);

    let err = h.orchestrator.reconcile(id).await.unwrap_err();
    assert_eq!(err.kind(), "fatal");

    h.orders.set_fail_on_cancel(false);
    let report = h.sweeper.run_once().await;
    assert_eq!(report.reconciled, 1);

    let session = h.orchestrator.get_session(id).await.unwrap();
    assert_eq!(session.status, CheckoutStatus::Failed);
    assert!(!session.reconciliation_required);
    assert!(session.compensation_errors.is_empty());
    assert_eq!(h.orders.open_orders(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_advances_have_one_winner() {
    let h = TestHarness::new().await;
    h.stock.set_latency(Some(Duration::from_millis(10))).await;
    let command = StartCheckout::new(
        UserId::new(),
        vec![CheckoutItem::new("SKU-001", "default", Money::from_minor(100), 2)],
    );
    let id = h.orchestrator.start_checkout(command).await.unwrap().id;

    let (a, b) = tokio::join!(h.orchestrator.advance(id), h.orchestrator.advance(id));

    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(CheckoutError::Conflict { .. })))
        .count();
    assert_eq!((wins, conflicts), (1, 1));

    assert_eq!(h.stock.active_count().await, 1);
    let session = h.orchestrator.get_session(id).await.unwrap();
    assert_eq!(session.status, CheckoutStatus::ItemsReserved);
    assert_eq!(h.available("SKU-001").await, 8);
}

#[tokio::test(start_paused = true)]
async fn test_captured_payment_completes_instead_of_expiring() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    h.orchestrator.advance(id).await.unwrap();
    let mut session = h.orchestrator.advance(id).await.unwrap();

    // Charged, then crashed before recording the outcome
    h.guard
        .charge(ChargeRequest {
            idempotency_key: session.idempotency_key(),
            checkout_id: id,
            order_id: session.order_id,
            amount: session.total,
            currency: session.currency.clone(),
            method: session.payment_method,
        })
        .await
        .unwrap();
    session.status = CheckoutStatus::PaymentProcessing;
    h.sessions.put(session);

    h.clock.advance(chrono::Duration::minutes(16));
    let report = h.sweeper.run_once().await;

    assert_eq!(report.sessions_expired, 0);
    let session = h.orchestrator.get_session(id).await.unwrap();
    assert_eq!(session.status, CheckoutStatus::Completed);
    assert_eq!(h.gateway.charge_count(), 1);
    let stock = h
        .reservations
        .get_stock(&"SKU-001".into(), &"default".into())
        .await
        .unwrap();
    assert_eq!(stock.sold, 2);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_during_in_flight_charge_refunds_the_late_capture() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    h.orchestrator.advance(id).await.unwrap();
    h.orchestrator.advance(id).await.unwrap();
    h.gateway.set_latency(Some(Duration::from_millis(500)));

    let sweep = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.clock.advance(chrono::Duration::minutes(16));
        h.sweeper.run_once().await
    };
    let (saga, report) = tokio::join!(h.orchestrator.advance(id), sweep);

    assert_eq!(report.sessions_expired, 1);
    assert!(matches!(saga, Err(CheckoutError::Conflict { .. })));

    let session = h.orchestrator.get_session(id).await.unwrap();
    assert_eq!(session.status, CheckoutStatus::Expired);
    assert!(!session.reconciliation_required);

    let payment = h
        .payments
        .find_by_key(&session.idempotency_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(h.gateway.charge_count(), 1);
    assert_eq!(h.gateway.refunded_total(), session.total);
    assert_eq!(h.stock.active_count().await, 0);
    assert_eq!(h.available("SKU-001").await, 10);
    assert_eq!(h.orders.open_orders(), 0);
    assert_eq!(h.published(topics::CHECKOUT_FAILED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_during_terminating_refund_pays_out_once() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    h.orchestrator.advance(id).await.unwrap();
    let mut session = h.orchestrator.advance(id).await.unwrap();

    // Charged, then crashed before recording the outcome
    h.guard
        .charge(ChargeRequest {
            idempotency_key: session.idempotency_key(),
            checkout_id: id,
            order_id: session.order_id,
            amount: session.total,
            currency: session.currency.clone(),
            method: session.payment_method,
        })
        .await
        .unwrap();
    session.status = CheckoutStatus::PaymentProcessing;
    h.sessions.put(session);
    h.sessions.request_cancel(id, "changed mind").await.unwrap();
    h.gateway.set_latency(Some(Duration::from_secs(1)));

    let sweep = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.sweeper.run_once().await
    };
    let (saga, _) = tokio::join!(h.orchestrator.advance(id), sweep);

    let saga = saga.unwrap();
    assert_eq!(saga.status, CheckoutStatus::Failed);
    assert_eq!(saga.failure_reason.as_deref(), Some("canceled: changed mind"));

    let session = h.orchestrator.get_session(id).await.unwrap();
    assert!(!session.reconciliation_required);
    let payment = h
        .payments
        .find_by_key(&session.idempotency_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(h.gateway.refund_count(), 1);
    assert_eq!(h.gateway.refunded_total(), session.total);
    assert_eq!(h.stock.active_count().await, 0);
    assert_eq!(h.orders.open_orders(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_event_publish_failure_does_not_roll_back() {
    let h = TestHarness::new().await;
    h.broker
        .set_topic_failing(topics::CHECKOUT_COMPLETED.name(), true);
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;

    let session = h.orchestrator.run_to_completion(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Completed);
    assert_eq!(h.published(topics::CHECKOUT_COMPLETED), 0);
    let dead = h.broker.published(&topics::CHECKOUT_COMPLETED.dead_letter());
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].aggregate_id, id.to_string());
}

#[tokio::test(start_paused = true)]
async fn test_zero_total_completes_without_charging() {
    let h = TestHarness::new().await;
    let command = StartCheckout::new(
        UserId::new(),
        vec![CheckoutItem::new("SKU-002", "default", Money::from_minor(1_000), 1)],
    )
    .with_discount(Money::from_minor(1_000));
    let id = h.orchestrator.start_checkout(command).await.unwrap().id;

    let session = h.orchestrator.run_to_completion(id).await.unwrap();

    assert_eq!(session.status, CheckoutStatus::Completed);
    assert_eq!(session.payment_id, None);
    assert_eq!(h.gateway.charge_count(), 0);
    assert!(h.payments.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_spawned_sweeper_expires_sessions_until_shutdown() {
    let h = TestHarness::new().await;
    let id = h.orchestrator.start_checkout(h.command()).await.unwrap().id;
    h.clock.advance(chrono::Duration::minutes(16));
    assert!(h.clock.now() > h.orchestrator.get_session(id).await.unwrap().expires_at);

    let handle = h.sweeper.clone().with_interval(Duration::from_secs(1)).spawn();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    handle.shutdown().await;

    let session = h.orchestrator.get_session(id).await.unwrap();
    assert_eq!(session.status, CheckoutStatus::Expired);
    assert_eq!(h.published(topics::CHECKOUT_FAILED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_save_is_a_conflict() {
    let h = TestHarness::new().await;
    let stale = h.orchestrator.start_checkout(h.command()).await.unwrap();
    h.orchestrator.advance(stale.id).await.unwrap();

    let err = h.sessions.save(&stale).await.unwrap_err();
    assert!(matches!(err, checkout::StoreError::Conflict { expected: 0, .. }));
}
