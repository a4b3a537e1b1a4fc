//! PostgreSQL integration tests for the session store
//!
//! These tests start a PostgreSQL container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p checkout --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use checkout::{
    CheckoutItem, CheckoutStatus, PostgresSessionStore, SessionStore, StartCheckout, StoreError,
};
use chrono::{Duration, Utc};
use common::{Money, ReservationId, SessionId, UserId};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/003_checkout_sessions.sql"))
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresSessionStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE checkout_sessions")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSessionStore::new(pool)
}

fn session(ttl: Duration) -> checkout::CheckoutSession {
    StartCheckout::new(
        UserId::new(),
        vec![
            CheckoutItem::new("SKU-1", "M", Money::from_minor(1_250), 2),
            CheckoutItem::new("SKU-2", "L", Money::from_minor(4_000), 1),
        ],
    )
    .with_shipping(Money::from_minor(500))
    .into_session(Utc::now(), ttl)
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn insert_and_load_roundtrip() {
    let store = get_test_store().await;
    let session = session(Duration::minutes(15));

    store.insert(&session).await.unwrap();
    let loaded = store.load(session.id).await.unwrap().unwrap();

    assert_eq!(loaded.id, session.id);
    assert_eq!(loaded.status, CheckoutStatus::Initiated);
    assert_eq!(loaded.items, session.items);
    assert_eq!(loaded.total, Money::from_minor(7_000));
    assert_eq!(loaded.correlation_id, session.correlation_id);
    assert_eq!(loaded.version, 0);
    assert!(store.load(SessionId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn duplicate_insert_is_rejected() {
    let store = get_test_store().await;
    let session = session(Duration::minutes(15));

    store.insert(&session).await.unwrap();
    let err = store.insert(&session).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(id) if id == session.id));
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn save_bumps_version_and_rejects_stale_writers() {
    let store = get_test_store().await;
    let mut session = session(Duration::minutes(15));
    store.insert(&session).await.unwrap();

    session.items[0].reservation_id = Some(ReservationId::new());
    session.status = CheckoutStatus::ItemsReserved;
    let saved = store.save(&session).await.unwrap();
    assert_eq!(saved.version, 1);
    assert_eq!(saved.items[0].reservation_id, session.items[0].reservation_id);

    let err = store.save(&session).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Conflict {
            expected: 0,
            actual: 1,
            ..
        }
    ));

    let mut missing = session.clone();
    missing.id = SessionId::new();
    assert!(matches!(
        store.save(&missing).await.unwrap_err(),
        StoreError::NotFound(_)
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn cancel_request_survives_saves_and_skips_terminal_sessions() {
    let store = get_test_store().await;
    let mut session = session(Duration::minutes(15));
    store.insert(&session).await.unwrap();

    let flagged = store.request_cancel(session.id, "changed mind").await.unwrap().unwrap();
    assert_eq!(flagged.cancel_requested.as_deref(), Some("changed mind"));
    assert_eq!(flagged.version, 0);

    // First reason wins
    let again = store.request_cancel(session.id, "other").await.unwrap().unwrap();
    assert_eq!(again.cancel_requested.as_deref(), Some("changed mind"));

    // A writer that loaded before the request does not clear it
    session.status = CheckoutStatus::Failed;
    let saved = store.save(&session).await.unwrap();
    assert_eq!(saved.cancel_requested.as_deref(), Some("changed mind"));

    let terminal = store.request_cancel(session.id, "late").await.unwrap().unwrap();
    assert_eq!(terminal.status, CheckoutStatus::Failed);
    assert_eq!(terminal.version, saved.version);
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn lists_expired_and_flagged_sessions() {
    let store = get_test_store().await;

    let overdue = session(Duration::minutes(-1));
    let fresh = session(Duration::minutes(15));
    let mut done = session(Duration::minutes(-5));
    store.insert(&overdue).await.unwrap();
    store.insert(&fresh).await.unwrap();
    store.insert(&done).await.unwrap();

    done.status = CheckoutStatus::Failed;
    done.reconciliation_required = true;
    done.compensation_errors = vec!["cancel_order: unavailable".to_string()];
    store.save(&done).await.unwrap();

    let expired = store.list_expired(Utc::now(), 10).await.unwrap();
    assert_eq!(expired, vec![overdue.id]);

    let flagged = store.list_needing_reconciliation(10).await.unwrap();
    assert_eq!(flagged, vec![done.id]);

    let loaded = store.load(done.id).await.unwrap().unwrap();
    assert_eq!(loaded.compensation_errors, done.compensation_errors);
}
