use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

use crate::database::booking_repository::status_list;
use crate::database::error::DatabaseError;
use crate::database::repository::{DbResult, PaymentRepository};
use crate::models::{Payment, PaymentStatus};
use crate::payments::types::ProviderName;

const PAYMENT_COLUMNS: &str = "id, reference, provider, provider_payment_id, booking_id, \
     payer_id, status, amount, settled_amount, refunded_amount, currency, metadata, \
     failure_reason, confirmed_at, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: String,
    reference: String,
    provider: String,
    provider_payment_id: Option<String>,
    booking_id: String,
    payer_id: String,
    status: String,
    amount: i64,
    settled_amount: Option<i64>,
    refunded_amount: Option<i64>,
    currency: String,
    metadata: serde_json::Value,
    failure_reason: Option<String>,
    confirmed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::decode(format!("payment {} has unknown status '{}'", row.id, row.status))
        })?;
        let provider = ProviderName::from_str(&row.provider)
            .map_err(|e| DatabaseError::decode(format!("payment {}: {}", row.id, e)))?;
        Ok(Payment {
            id: row.id,
            reference: row.reference,
            provider,
            provider_payment_id: row.provider_payment_id,
            booking_id: row.booking_id,
            payer_id: row.payer_id,
            status,
            amount: row.amount,
            settled_amount: row.settled_amount,
            refunded_amount: row.refunded_amount,
            currency: row.currency,
            metadata: row.metadata,
            failure_reason: row.failure_reason,
            confirmed_at: row.confirmed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for payment attempts
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, filter: &str, value: &str) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE {} = $1",
            PAYMENT_COLUMNS, filter
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Payment::try_from)
        .transpose()
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert(&self, payment: &Payment) -> DbResult<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments (id, reference, provider, provider_payment_id, booking_id, \
             payer_id, status, amount, currency, metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(&payment.id)
        .bind(&payment.reference)
        .bind(payment.provider.as_str())
        .bind(&payment.provider_payment_id)
        .bind(&payment.booking_id)
        .bind(&payment.payer_id)
        .bind(payment.status.as_str())
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.metadata)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn find_by_id(&self, id: &str) -> DbResult<Option<Payment>> {
        self.find_one("id", id).await
    }

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Payment>> {
        self.find_one("reference", reference).await
    }

    async fn find_by_provider_payment_id(
        &self,
        provider: ProviderName,
        provider_payment_id: &str,
    ) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE provider = $1 AND provider_payment_id = $2",
            PAYMENT_COLUMNS
        ))
        .bind(provider.as_str())
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Payment::try_from)
        .transpose()
    }

    async fn list_by_booking(&self, booking_id: &str) -> DbResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE booking_id = $1 ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn update_if_status(
        &self,
        payment: &Payment,
        expected: &[PaymentStatus],
    ) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments \
             SET status = $2, provider_payment_id = $3, settled_amount = $4, \
                 refunded_amount = $5, metadata = $6, failure_reason = $7, \
                 confirmed_at = $8, updated_at = $9 \
             WHERE id = $1 AND status = ANY($10) \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(&payment.id)
        .bind(payment.status.as_str())
        .bind(&payment.provider_payment_id)
        .bind(payment.settled_amount)
        .bind(payment.refunded_amount)
        .bind(&payment.metadata)
        .bind(&payment.failure_reason)
        .bind(payment.confirmed_at)
        .bind(payment.updated_at)
        .bind(status_list(expected))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Payment::try_from)
        .transpose()
    }
}
