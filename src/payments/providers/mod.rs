pub mod hosted_checkout;
pub mod mobile_money;
pub mod reference;

pub use hosted_checkout::{HostedCheckoutConfig, HostedCheckoutProvider};
pub use mobile_money::{MobileMoneyConfig, MobileMoneyProvider};
pub use reference::{ReferenceConfig, ReferenceProvider};

use crate::payments::error::{PaymentError, PaymentResult};

pub(crate) fn required_env(key: &str) -> PaymentResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::ValidationError {
            message: format!("{} environment variable is required", key),
            field: Some(key.to_string()),
        })
}

pub(crate) fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn malformed(provider: &str, reason: impl std::fmt::Display) -> PaymentError {
    PaymentError::WebhookPayloadError {
        message: format!("{} webhook: {}", provider, reason),
    }
}
