//! Domain entities shared by the services and every repository backend.

pub mod audit;
pub mod booking;
pub mod escrow;
pub mod idempotency;
pub mod payment;
pub mod rate_limit;

pub use audit::{ActorRole, AuditEntry, NotificationRecord};
pub use booking::{Booking, BookingStatus, CancellationStamp};
pub use escrow::{Escrow, EscrowStatus};
pub use idempotency::{IdempotencyRecord, IdempotencyStatus};
pub use payment::{Payment, PaymentStatus};
pub use rate_limit::RateLimitRecord;

/// Generates an opaque entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
