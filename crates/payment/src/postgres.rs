use async_trait::async_trait;
use common::{Currency, Money, OrderId, PaymentId, SessionId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::repository::{Expected, PaymentRepository};
use crate::types::Payment;

const IDEMPOTENCY_CONSTRAINT: &str = "unique_payment_idempotency_key";

const COLUMNS: &str = "id, checkout_id, order_id, amount, currency, method, status, idempotency_key, \
     refunded_amount, pending_refund, gateway_reference, failure_reason, created_at, updated_at";

/// PostgreSQL-backed payment repository.
///
/// Idempotency keys are enforced by a unique index, so racing inserts have
/// exactly one winner.
#[derive(Clone)]
pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        let method: String = row.try_get("method")?;
        let currency: String = row.try_get("currency")?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            checkout_id: SessionId::from_uuid(row.try_get::<Uuid, _>("checkout_id")?),
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            amount: Money::from_minor(row.try_get("amount")?),
            currency: Currency::new(currency),
            method: method.parse().map_err(PaymentError::InvalidData)?,
            status: status.parse().map_err(PaymentError::InvalidData)?,
            idempotency_key: row.try_get("idempotency_key")?,
            refunded_amount: Money::from_minor(row.try_get("refunded_amount")?),
            pending_refund: Money::from_minor(row.try_get("pending_refund")?),
            gateway_reference: row.try_get("gateway_reference")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO payments ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(payment.id.as_uuid())
        .bind(payment.checkout_id.as_uuid())
        .bind(payment.order_id.map(|o| o.as_uuid()))
        .bind(payment.amount.minor())
        .bind(payment.currency.as_str())
        .bind(payment.method.as_str())
        .bind(payment.status.as_str())
        .bind(payment.idempotency_key.as_deref())
        .bind(payment.refunded_amount.minor())
        .bind(payment.pending_refund.minor())
        .bind(payment.gateway_reference.as_deref())
        .bind(payment.failure_reason.as_deref())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(IDEMPOTENCY_CONSTRAINT)
            {
                return PaymentError::Conflict(payment.idempotency_key.clone().unwrap_or_default());
            }
            PaymentError::Database(e)
        })?;
        Ok(())
    }

    async fn update(&self, payment: &Payment, expected: Expected) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET order_id = $4, status = $5, refunded_amount = $6, pending_refund = $7,
                gateway_reference = $8, failure_reason = $9, updated_at = $10
            WHERE id = $1 AND status = $2 AND refunded_amount = $3
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(expected.status.as_str())
        .bind(expected.refunded_amount.minor())
        .bind(payment.order_id.map(|o| o.as_uuid()))
        .bind(payment.status.as_str())
        .bind(payment.refunded_amount.minor())
        .bind(payment.pending_refund.minor())
        .bind(payment.gateway_reference.as_deref())
        .bind(payment.failure_reason.as_deref())
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get(payment.id).await? {
            Some(_) => Ok(false),
            None => Err(PaymentError::NotFound(payment.id)),
        }
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM payments WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM payments WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_payment).transpose()
    }
}
