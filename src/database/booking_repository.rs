use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::database::error::DatabaseError;
use crate::database::repository::{BookingRepository, DbResult};
use crate::models::{ActorRole, Booking, BookingStatus};

const BOOKING_COLUMNS: &str = "id, client_id, supplier_id, package_id, status, total_price, \
     paid_amount, currency, event_date, cancelled_at, cancelled_by, cancelled_by_role, \
     cancellation_reason, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct BookingRow {
    id: String,
    client_id: String,
    supplier_id: String,
    package_id: String,
    status: String,
    total_price: i64,
    paid_amount: i64,
    currency: String,
    event_date: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<String>,
    cancelled_by_role: Option<String>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = DatabaseError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = BookingStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::decode(format!("booking {} has unknown status '{}'", row.id, row.status))
        })?;
        let cancelled_by_role = match row.cancelled_by_role.as_deref() {
            Some(raw) => Some(ActorRole::from_db(raw).ok_or_else(|| {
                DatabaseError::decode(format!("booking {} has unknown role '{}'", row.id, raw))
            })?),
            None => None,
        };
        Ok(Booking {
            id: row.id,
            client_id: row.client_id,
            supplier_id: row.supplier_id,
            package_id: row.package_id,
            status,
            total_price: row.total_price,
            paid_amount: row.paid_amount,
            currency: row.currency,
            event_date: row.event_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
            cancelled_at: row.cancelled_at,
            cancelled_by: row.cancelled_by,
            cancelled_by_role,
            cancellation_reason: row.cancellation_reason,
        })
    }
}

pub(crate) fn status_list<T: ToString>(statuses: &[T]) -> Vec<String> {
    statuses.iter().map(ToString::to_string).collect()
}

/// Postgres-backed bookings
pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> DbResult<Booking> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "INSERT INTO bookings (id, client_id, supplier_id, package_id, status, total_price, \
             paid_amount, currency, event_date, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(&booking.id)
        .bind(&booking.client_id)
        .bind(&booking.supplier_id)
        .bind(&booking.package_id)
        .bind(booking.status.as_str())
        .bind(booking.total_price)
        .bind(booking.paid_amount)
        .bind(&booking.currency)
        .bind(booking.event_date)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn find_by_id(&self, id: &str) -> DbResult<Option<Booking>> {
        sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Booking::try_from)
        .transpose()
    }

    async fn update_if_status(
        &self,
        booking: &Booking,
        expected: &[BookingStatus],
    ) -> DbResult<Option<Booking>> {
        sqlx::query_as::<_, BookingRow>(&format!(
            "UPDATE bookings \
             SET status = $2, cancelled_at = $3, cancelled_by = $4, cancelled_by_role = $5, \
                 cancellation_reason = $6, updated_at = $7 \
             WHERE id = $1 AND status = ANY($8) \
             RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(&booking.id)
        .bind(booking.status.as_str())
        .bind(booking.cancelled_at)
        .bind(&booking.cancelled_by)
        .bind(booking.cancelled_by_role.map(|r| r.as_str()))
        .bind(&booking.cancellation_reason)
        .bind(booking.updated_at)
        .bind(status_list(expected))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Booking::try_from)
        .transpose()
    }

    async fn credit_payment(&self, id: &str, amount: i64) -> DbResult<Option<Booking>> {
        sqlx::query_as::<_, BookingRow>(&format!(
            "UPDATE bookings \
             SET paid_amount = paid_amount + $2, \
                 status = CASE WHEN status = 'confirmed' THEN 'paid' ELSE status END, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Booking::try_from)
        .transpose()
    }
}
