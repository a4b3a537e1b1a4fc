use std::sync::Arc;

use chrono::Utc;
use common::{Currency, ManualClock, Money, SessionId};
use event_bus::{EventPublisher, InMemoryBroker};
use payment::{
    ChargeRequest, InMemoryGateway, InMemoryPaymentRepository, PaymentGuard, PaymentMethod,
    PaymentRepository, PaymentStatus,
};
use resilience::RetryPolicy;

fn guard(repository: &InMemoryPaymentRepository, gateway: &InMemoryGateway) -> PaymentGuard {
    PaymentGuard::new(
        Arc::new(repository.clone()),
        Arc::new(gateway.clone()),
        Arc::new(ManualClock::new(Utc::now())),
        EventPublisher::new(
            Arc::new(InMemoryBroker::new()),
            "payment-service",
            RetryPolicy::once(),
        ),
    )
}

fn request(checkout_id: SessionId) -> ChargeRequest {
    ChargeRequest {
        idempotency_key: format!("checkout-{checkout_id}-payment"),
        checkout_id,
        order_id: None,
        amount: Money::from_minor(4_200),
        currency: Currency::new("usd"),
        method: PaymentMethod::Card,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_charges_with_one_key_have_one_winner() {
    let repository = InMemoryPaymentRepository::new();
    let gateway = InMemoryGateway::new();
    gateway.set_latency(Some(std::time::Duration::from_millis(20)));
    let guard = Arc::new(guard(&repository, &gateway));
    let checkout_id = SessionId::new();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let guard = guard.clone();
            tokio::spawn(async move { guard.charge(request(checkout_id)).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1, "every caller observes the same payment");
    assert_eq!(repository.len(), 1);
    assert_eq!(gateway.charge_count(), 1);

    let stored = repository
        .find_by_key(&format!("checkout-{checkout_id}-payment"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PaymentStatus::Succeeded);
    assert_eq!(stored.currency.as_str(), "USD");
}

#[tokio::test]
async fn distinct_keys_charge_independently() {
    let repository = InMemoryPaymentRepository::new();
    let gateway = InMemoryGateway::new();
    let guard = guard(&repository, &gateway);

    let a = guard.charge(request(SessionId::new())).await.unwrap();
    let b = guard.charge(request(SessionId::new())).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(repository.len(), 2);
    assert_eq!(gateway.charge_count(), 2);
}

#[tokio::test]
async fn gateway_reference_is_recorded() {
    let repository = InMemoryPaymentRepository::new();
    let gateway = InMemoryGateway::new();
    let guard = guard(&repository, &gateway);

    let payment = guard.charge(request(SessionId::new())).await.unwrap();
    assert!(payment.gateway_reference.as_deref().unwrap().starts_with("GW-"));
    assert_eq!(guard.get(payment.id).await.unwrap(), payment);
}
