//! Payment provider abstraction: one trait over every payment rail, with
//! webhook payloads normalized into a single event shape.

pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::PaymentProviderRegistry;
pub use provider::PaymentProvider;
pub use types::{ProviderName, WebhookEvent, WebhookEventType};
