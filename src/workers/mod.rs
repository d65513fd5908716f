//! Background jobs driven by a shutdown watch channel.

pub mod escrow_release;
pub mod idempotency_cleanup;
