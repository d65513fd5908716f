use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment declined: {message}")]
    PaymentDeclinedError {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Webhook payload rejected: {message}")]
    WebhookPayloadError { message: String },

    #[error("{provider} does not support {operation}")]
    UnsupportedOperation { provider: String, operation: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        PaymentError::ProviderError {
            provider: provider.into(),
            message: message.into(),
            provider_code: None,
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::NetworkError { .. } | PaymentError::RateLimitError { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::ValidationError { .. }
            | PaymentError::PaymentDeclinedError { .. }
            | PaymentError::WebhookVerificationError { .. }
            | PaymentError::WebhookPayloadError { .. }
            | PaymentError::UnsupportedOperation { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::PaymentDeclinedError { .. } => 402,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 400,
            PaymentError::WebhookPayloadError { .. } => 400,
            PaymentError::UnsupportedOperation { .. } => 422,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    fn provider_label(&self) -> String {
        match self {
            PaymentError::ProviderError { provider, .. }
            | PaymentError::UnsupportedOperation { provider, .. } => provider.clone(),
            _ => "payments".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match &err {
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidValue {
                    field: field.clone().unwrap_or_else(|| "payment".to_string()),
                    reason: message.clone(),
                }))
            }
            _ => AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                provider: err.provider_label(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorCode};

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::UnsupportedOperation {
                provider: "reference".to_string(),
                operation: "refunds".to_string()
            }
            .http_status_code(),
            422
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::PaymentDeclinedError {
            message: "declined".to_string(),
            provider_code: None
        }
        .is_retryable());
    }

    #[test]
    fn converts_into_app_error_codes() {
        let unavailable: AppError = PaymentError::NetworkError {
            message: "connect timeout".to_string(),
        }
        .into();
        assert_eq!(unavailable.error_code(), ErrorCode::Unavailable);

        let unsupported: AppError = PaymentError::UnsupportedOperation {
            provider: "reference".to_string(),
            operation: "refunds".to_string(),
        }
        .into();
        assert_eq!(unsupported.error_code(), ErrorCode::FailedPrecondition);

        let invalid: AppError = PaymentError::ValidationError {
            message: "amount must be positive".to_string(),
            field: Some("amount".to_string()),
        }
        .into();
        assert_eq!(invalid.error_code(), ErrorCode::InvalidArgument);
    }
}
