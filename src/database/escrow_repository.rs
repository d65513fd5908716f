use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::database::booking_repository::status_list;
use crate::database::error::DatabaseError;
use crate::database::repository::{DbResult, EscrowRepository};
use crate::models::{Escrow, EscrowStatus};

const ESCROW_COLUMNS: &str = "id, booking_id, status, amount, funded_amount, currency, \
     payment_ids, funded_at, service_completed_at, released_at, refunded_at, refund_actor, \
     refund_reason, release_actor, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct EscrowRow {
    id: String,
    booking_id: String,
    status: String,
    amount: i64,
    funded_amount: i64,
    currency: String,
    payment_ids: Vec<String>,
    funded_at: Option<DateTime<Utc>>,
    service_completed_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    refund_actor: Option<String>,
    refund_reason: Option<String>,
    release_actor: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EscrowRow> for Escrow {
    type Error = DatabaseError;

    fn try_from(row: EscrowRow) -> Result<Self, Self::Error> {
        let status = EscrowStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::decode(format!("escrow {} has unknown status '{}'", row.id, row.status))
        })?;
        Ok(Escrow {
            id: row.id,
            booking_id: row.booking_id,
            status,
            amount: row.amount,
            funded_amount: row.funded_amount,
            currency: row.currency,
            payment_ids: row.payment_ids,
            funded_at: row.funded_at,
            service_completed_at: row.service_completed_at,
            released_at: row.released_at,
            refunded_at: row.refunded_at,
            refund_actor: row.refund_actor,
            refund_reason: row.refund_reason,
            release_actor: row.release_actor,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_all(rows: Vec<EscrowRow>) -> DbResult<Vec<Escrow>> {
    rows.into_iter().map(Escrow::try_from).collect()
}

pub struct PgEscrowRepository {
    pool: PgPool,
}

impl PgEscrowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EscrowRepository for PgEscrowRepository {
    async fn insert(&self, escrow: &Escrow) -> DbResult<Escrow> {
        let row = sqlx::query_as::<_, EscrowRow>(&format!(
            "INSERT INTO escrows (id, booking_id, status, amount, funded_amount, currency, \
             payment_ids, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {}",
            ESCROW_COLUMNS
        ))
        .bind(&escrow.id)
        .bind(&escrow.booking_id)
        .bind(escrow.status.as_str())
        .bind(escrow.amount)
        .bind(escrow.funded_amount)
        .bind(&escrow.currency)
        .bind(&escrow.payment_ids)
        .bind(escrow.created_at)
        .bind(escrow.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn find_by_id(&self, id: &str) -> DbResult<Option<Escrow>> {
        sqlx::query_as::<_, EscrowRow>(&format!(
            "SELECT {} FROM escrows WHERE id = $1",
            ESCROW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Escrow::try_from)
        .transpose()
    }

    async fn find_by_booking(&self, booking_id: &str) -> DbResult<Option<Escrow>> {
        sqlx::query_as::<_, EscrowRow>(&format!(
            "SELECT {} FROM escrows WHERE booking_id = $1",
            ESCROW_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Escrow::try_from)
        .transpose()
    }

    async fn fund(
        &self,
        id: &str,
        payment_id: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> DbResult<Option<Escrow>> {
        sqlx::query_as::<_, EscrowRow>(&format!(
            "UPDATE escrows \
             SET funded_amount = funded_amount + $3, \
                 payment_ids = array_append(payment_ids, $2), \
                 status = 'funded', \
                 funded_at = COALESCE(funded_at, $4), \
                 updated_at = $4 \
             WHERE id = $1 \
               AND status IN ('pending', 'funded') \
               AND NOT ($2 = ANY(payment_ids)) \
             RETURNING {}",
            ESCROW_COLUMNS
        ))
        .bind(id)
        .bind(payment_id)
        .bind(amount)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Escrow::try_from)
        .transpose()
    }

    async fn update_if_status(
        &self,
        escrow: &Escrow,
        expected: &[EscrowStatus],
    ) -> DbResult<Option<Escrow>> {
        sqlx::query_as::<_, EscrowRow>(&format!(
            "UPDATE escrows \
             SET status = $2, service_completed_at = $3, released_at = $4, refunded_at = $5, \
                 refund_actor = $6, refund_reason = $7, release_actor = $8, updated_at = $9 \
             WHERE id = $1 AND status = ANY($10) \
             RETURNING {}",
            ESCROW_COLUMNS
        ))
        .bind(&escrow.id)
        .bind(escrow.status.as_str())
        .bind(escrow.service_completed_at)
        .bind(escrow.released_at)
        .bind(escrow.refunded_at)
        .bind(&escrow.refund_actor)
        .bind(&escrow.refund_reason)
        .bind(&escrow.release_actor)
        .bind(escrow.updated_at)
        .bind(status_list(expected))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Escrow::try_from)
        .transpose()
    }

    async fn list_releasable(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<Escrow>> {
        let rows = sqlx::query_as::<_, EscrowRow>(&format!(
            "SELECT {} FROM escrows \
             WHERE status = 'service_completed' AND service_completed_at <= $1 \
             ORDER BY service_completed_at ASC \
             LIMIT $2",
            ESCROW_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        decode_all(rows)
    }
}
