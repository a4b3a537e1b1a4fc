use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ProductId, ReservationId, SessionId, VariantId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::error::{InventoryError, Result};
use crate::store::StockStore;
use crate::types::{
    ReleaseReason, ReservationStatus, Stock, StockAdjustment, StockReservation, Transition,
};

const RESERVATION_COLUMNS: &str = "id, product_id, variant_id, quantity, status, release_reason, \
     session_id, created_at, expires_at, updated_at";

/// PostgreSQL-backed stock store.
///
/// Availability and status checks are part of the `UPDATE` predicates, so
/// concurrent callers never read-then-write.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_stock(row: PgRow) -> Result<Stock> {
        Ok(Stock {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            variant_id: VariantId::new(row.try_get::<String, _>("variant_id")?),
            total: row.try_get("total")?,
            reserved: row.try_get("reserved")?,
            sold: row.try_get("sold")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<StockReservation> {
        let status: String = row.try_get("status")?;
        let release_reason: Option<String> = row.try_get("release_reason")?;
        let quantity: i32 = row.try_get("quantity")?;

        Ok(StockReservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            variant_id: VariantId::new(row.try_get::<String, _>("variant_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| InventoryError::InvalidData(format!("quantity {quantity}")))?,
            status: status.parse().map_err(InventoryError::InvalidData)?,
            release_reason: release_reason
                .map(|r| r.parse())
                .transpose()
                .map_err(InventoryError::InvalidData)?,
            session_id: row
                .try_get::<Option<Uuid>, _>("session_id")?
                .map(SessionId::from_uuid),
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn load_reservation(
        tx: &mut Transaction<'_, Postgres>,
        id: ReservationId,
    ) -> Result<StockReservation> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(InventoryError::ReservationNotFound(id))?;
        Self::row_to_reservation(row)
    }

    /// Applies an `active -> target` transition and the matching stock update
    /// in one transaction.
    async fn finish(
        &self,
        id: ReservationId,
        target: ReservationStatus,
        reason: Option<ReleaseReason>,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(&format!(
            r#"
            UPDATE stock_reservations
            SET status = $2, release_reason = $3, updated_at = $4
            WHERE id = $1 AND status = 'active'
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(target.as_str())
        .bind(reason.map(|r| r.as_str()))
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            let current = Self::load_reservation(&mut tx, id).await?;
            tx.rollback().await?;
            let unchanged = current.status == target
                || (current.status == ReservationStatus::Expired
                    && target == ReservationStatus::Released);
            if unchanged {
                return Ok(Transition {
                    reservation: current,
                    changed: false,
                });
            }
            return Err(InventoryError::InvalidTransition {
                id,
                from: current.status,
                to: target,
            });
        };
        let reservation = Self::row_to_reservation(row)?;
        let quantity = i64::from(reservation.quantity);

        let stock_update = if target == ReservationStatus::Committed {
            r#"
            UPDATE stock
            SET total = total - $3, reserved = reserved - $3, sold = sold + $3, updated_at = $4
            WHERE product_id = $1 AND variant_id = $2
            "#
        } else {
            r#"
            UPDATE stock
            SET reserved = reserved - $3, updated_at = $4
            WHERE product_id = $1 AND variant_id = $2
            "#
        };
        sqlx::query(stock_update)
            .bind(reservation.product_id.as_str())
            .bind(reservation.variant_id.as_str())
            .bind(quantity)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Transition {
            reservation,
            changed: true,
        })
    }
}

/// An adjustment that pushes `total` past `BIGINT` is the caller's mistake.
fn out_of_range(e: sqlx::Error, adjustment: &StockAdjustment) -> InventoryError {
    let numeric_out_of_range = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "22003");
    if numeric_out_of_range {
        InventoryError::Validation(format!(
            "adjusting {}/{} by {} overflows its total",
            adjustment.product_id, adjustment.variant_id, adjustment.delta
        ))
    } else {
        InventoryError::Database(e)
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn reserve(&self, reservation: StockReservation) -> Result<StockReservation> {
        let requested = i64::from(reservation.quantity);
        let quantity = i32::try_from(reservation.quantity).map_err(|_| {
            InventoryError::Validation(format!(
                "quantity {} exceeds the storable maximum",
                reservation.quantity
            ))
        })?;
        let mut tx = self.pool.begin().await?;

        let held = sqlx::query(
            r#"
            UPDATE stock
            SET reserved = reserved + $3, updated_at = $4
            WHERE product_id = $1 AND variant_id = $2 AND total - reserved >= $3
            "#,
        )
        .bind(reservation.product_id.as_str())
        .bind(reservation.variant_id.as_str())
        .bind(requested)
        .bind(reservation.created_at)
        .execute(&mut *tx)
        .await?;

        if held.rows_affected() == 0 {
            let available: Option<i64> = sqlx::query_scalar(
                "SELECT total - reserved FROM stock WHERE product_id = $1 AND variant_id = $2",
            )
            .bind(reservation.product_id.as_str())
            .bind(reservation.variant_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Err(InventoryError::InsufficientStock {
                product_id: reservation.product_id,
                variant_id: reservation.variant_id,
                requested,
                available: available.unwrap_or(0),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO stock_reservations
                (id, product_id, variant_id, quantity, status, release_reason, session_id, created_at, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NULL, $6, $7, $8, $9)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.product_id.as_str())
        .bind(reservation.variant_id.as_str())
        .bind(quantity)
        .bind(reservation.status.as_str())
        .bind(reservation.session_id.map(|s| s.as_uuid()))
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn commit(&self, id: ReservationId, at: DateTime<Utc>) -> Result<Transition> {
        self.finish(id, ReservationStatus::Committed, None, at).await
    }

    async fn release(
        &self,
        id: ReservationId,
        reason: ReleaseReason,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        self.finish(id, ReservationStatus::Released, Some(reason), at)
            .await
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReservationId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM stock_reservations
            WHERE status = 'active' AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(ReservationId::from_uuid).collect())
    }

    async fn adjust(&self, adjustment: StockAdjustment) -> Result<Stock> {
        let mut tx = self.pool.begin().await?;

        if adjustment.delta >= 0 {
            sqlx::query(
                r#"
                INSERT INTO stock (product_id, variant_id, total, reserved, sold, updated_at)
                VALUES ($1, $2, 0, 0, 0, $3)
                ON CONFLICT (product_id, variant_id) DO NOTHING
                "#,
            )
            .bind(adjustment.product_id.as_str())
            .bind(adjustment.variant_id.as_str())
            .bind(adjustment.created_at)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE stock
            SET total = total + $3, updated_at = $4
            WHERE product_id = $1 AND variant_id = $2 AND total + $3 >= reserved
            RETURNING product_id, variant_id, total, reserved, sold, updated_at
            "#,
        )
        .bind(adjustment.product_id.as_str())
        .bind(adjustment.variant_id.as_str())
        .bind(adjustment.delta)
        .bind(adjustment.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| out_of_range(e, &adjustment))?;

        let Some(row) = updated else {
            let available: Option<i64> = sqlx::query_scalar(
                "SELECT total - reserved FROM stock WHERE product_id = $1 AND variant_id = $2",
            )
            .bind(adjustment.product_id.as_str())
            .bind(adjustment.variant_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;

            return Err(match available {
                Some(available) => InventoryError::InsufficientStock {
                    product_id: adjustment.product_id,
                    variant_id: adjustment.variant_id,
                    requested: adjustment.delta.saturating_neg(),
                    available,
                },
                None => InventoryError::Validation(format!(
                    "cannot remove {} units from untracked variant {}/{}",
                    adjustment.delta.saturating_neg(), adjustment.product_id, adjustment.variant_id
                )),
            });
        };
        let stock = Self::row_to_stock(row)?;

        sqlx::query(
            r#"
            INSERT INTO stock_adjustments (product_id, variant_id, delta, reason, reference_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(adjustment.product_id.as_str())
        .bind(adjustment.variant_id.as_str())
        .bind(adjustment.delta)
        .bind(adjustment.reason.as_str())
        .bind(adjustment.reference_id.as_deref())
        .bind(adjustment.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stock)
    }

    async fn get_stock(
        &self,
        product_id: &ProductId,
        variant_id: &VariantId,
    ) -> Result<Option<Stock>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, variant_id, total, reserved, sold, updated_at
            FROM stock
            WHERE product_id = $1 AND variant_id = $2
            "#,
        )
        .bind(product_id.as_str())
        .bind(variant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_stock).transpose()
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<StockReservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn adjustments(
        &self,
        product_id: &ProductId,
        variant_id: &VariantId,
    ) -> Result<Vec<StockAdjustment>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, variant_id, delta, reason, reference_id, created_at
            FROM stock_adjustments
            WHERE product_id = $1 AND variant_id = $2
            ORDER BY id ASC
            "#,
        )
        .bind(product_id.as_str())
        .bind(variant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let reason: String = row.try_get("reason")?;
                Ok(StockAdjustment {
                    product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
                    variant_id: VariantId::new(row.try_get::<String, _>("variant_id")?),
                    delta: row.try_get("delta")?,
                    reason: reason.parse().map_err(InventoryError::InvalidData)?,
                    reference_id: row.try_get("reference_id")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
