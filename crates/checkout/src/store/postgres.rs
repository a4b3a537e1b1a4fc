use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Currency, Money, OrderId, PaymentId, SessionId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use uuid::Uuid;

use super::{SessionStore, StoreResult};
use crate::error::StoreError;
use crate::session::{Address, CheckoutItem, CheckoutSession};

const COLUMNS: &str = "id, user_id, status, items, subtotal, discount, shipping, total, currency, \
     shipping_address, billing_address, payment_method, payment_id, order_id, failure_reason, \
     cancel_requested, reconciliation_required, compensation_errors, correlation_id, version, \
     expires_at, created_at, updated_at";

const OPEN: &str = "status NOT IN ('completed', 'failed', 'expired')";

/// PostgreSQL-backed session store.
///
/// `save` is an `UPDATE ... WHERE version = $n`; the row is never read and
/// written in separate statements.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_session(row: PgRow) -> StoreResult<CheckoutSession> {
        let status: String = row.try_get("status")?;
        let method: String = row.try_get("payment_method")?;
        let currency: String = row.try_get("currency")?;
        let Json(items): Json<Vec<CheckoutItem>> = row.try_get("items")?;
        let shipping_address: Option<Json<Address>> = row.try_get("shipping_address")?;
        let billing_address: Option<Json<Address>> = row.try_get("billing_address")?;
        let Json(compensation_errors): Json<Vec<String>> = row.try_get("compensation_errors")?;

        Ok(CheckoutSession {
            id: SessionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            items,
            subtotal: Money::from_minor(row.try_get("subtotal")?),
            discount: Money::from_minor(row.try_get("discount")?),
            shipping: Money::from_minor(row.try_get("shipping")?),
            total: Money::from_minor(row.try_get("total")?),
            currency: Currency::new(currency),
            shipping_address: shipping_address.map(|Json(a)| a),
            billing_address: billing_address.map(|Json(a)| a),
            payment_method: method.parse().map_err(StoreError::InvalidData)?,
            payment_id: row
                .try_get::<Option<Uuid>, _>("payment_id")?
                .map(PaymentId::from_uuid),
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            failure_reason: row.try_get("failure_reason")?,
            status: status.parse().map_err(StoreError::InvalidData)?,
            cancel_requested: row.try_get("cancel_requested")?,
            reconciliation_required: row.try_get("reconciliation_required")?,
            compensation_errors,
            correlation_id: row.try_get("correlation_id")?,
            version: row.try_get("version")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn current_version(&self, id: SessionId) -> StoreResult<Option<i64>> {
        let version = sqlx::query_scalar("SELECT version FROM checkout_sessions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(version)
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn insert(&self, session: &CheckoutSession) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO checkout_sessions ({COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)"
        ))
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_uuid())
        .bind(session.status.as_str())
        .bind(Json(&session.items))
        .bind(session.subtotal.minor())
        .bind(session.discount.minor())
        .bind(session.shipping.minor())
        .bind(session.total.minor())
        .bind(session.currency.as_str())
        .bind(session.shipping_address.as_ref().map(Json))
        .bind(session.billing_address.as_ref().map(Json))
        .bind(session.payment_method.as_str())
        .bind(session.payment_id.map(|p| p.as_uuid()))
        .bind(session.order_id.map(|o| o.as_uuid()))
        .bind(session.failure_reason.as_deref())
        .bind(session.cancel_requested.as_deref())
        .bind(session.reconciliation_required)
        .bind(Json(&session.compensation_errors))
        .bind(session.correlation_id.as_str())
        .bind(session.version)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("checkout_sessions_pkey")
            {
                return StoreError::Duplicate(session.id);
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn load(&self, id: SessionId) -> StoreResult<Option<CheckoutSession>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM checkout_sessions WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_session).transpose()
    }

    async fn save(&self, session: &CheckoutSession) -> StoreResult<CheckoutSession> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE checkout_sessions
            SET status = $3, items = $4, subtotal = $5, discount = $6, shipping = $7, total = $8,
                shipping_address = $9, billing_address = $10, payment_id = $11, order_id = $12,
                failure_reason = $13, reconciliation_required = $14, compensation_errors = $15,
                updated_at = $16, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(session.id.as_uuid())
        .bind(session.version)
        .bind(session.status.as_str())
        .bind(Json(&session.items))
        .bind(session.subtotal.minor())
        .bind(session.discount.minor())
        .bind(session.shipping.minor())
        .bind(session.total.minor())
        .bind(session.shipping_address.as_ref().map(Json))
        .bind(session.billing_address.as_ref().map(Json))
        .bind(session.payment_id.map(|p| p.as_uuid()))
        .bind(session.order_id.map(|o| o.as_uuid()))
        .bind(session.failure_reason.as_deref())
        .bind(session.reconciliation_required)
        .bind(Json(&session.compensation_errors))
        .bind(session.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_session(row),
            None => match self.current_version(session.id).await? {
                Some(actual) => Err(StoreError::Conflict {
                    id: session.id,
                    expected: session.version,
                    actual,
                }),
                None => Err(StoreError::NotFound(session.id)),
            },
        }
    }

    async fn request_cancel(
        &self,
        id: SessionId,
        reason: &str,
    ) -> StoreResult<Option<CheckoutSession>> {
        sqlx::query(&format!(
            "UPDATE checkout_sessions SET cancel_requested = COALESCE(cancel_requested, $2) \
             WHERE id = $1 AND {OPEN}"
        ))
        .bind(id.as_uuid())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        self.load(id).await
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SessionId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(&format!(
            "SELECT id FROM checkout_sessions WHERE {OPEN} AND expires_at <= $1 \
             ORDER BY expires_at LIMIT $2"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(SessionId::from_uuid).collect())
    }

    async fn list_needing_reconciliation(&self, limit: usize) -> StoreResult<Vec<SessionId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM checkout_sessions WHERE reconciliation_required \
             ORDER BY updated_at LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(SessionId::from_uuid).collect())
    }
}
