//! Unified error handling for the booking and escrow backend
//!
//! Every failure surfaced to a caller carries a stable machine code, an
//! internal diagnostic message (logged, never returned), a localized
//! user-facing message and the request id used for support correlation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::locale::Locale;

/// Stable error codes returned to callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    FailedPrecondition,
    ResourceExhausted,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::NotFound => "not-found",
            ErrorCode::AlreadyExists => "already-exists",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::FailedPrecondition => "failed-precondition",
            ErrorCode::ResourceExhausted => "resource-exhausted",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Internal => "internal",
        }
    }

    /// Client errors are never retried automatically.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            ErrorCode::ResourceExhausted | ErrorCode::Unavailable | ErrorCode::Internal
        )
    }
}

/// Caller identity and authorization failures
#[derive(Debug, Clone)]
pub enum AuthError {
    /// No authenticated caller on the request
    Unauthenticated,
    /// Caller is not allowed to act on the resource
    PermissionDenied { user_id: String, resource: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Required field missing or empty
    MissingField { field: String },
    /// Field present but unusable
    InvalidValue { field: String, reason: String },
}

/// Business rule violations on bookings, escrows and payments
#[derive(Debug, Clone)]
pub enum DomainError {
    BookingNotFound { booking_id: String },
    EscrowNotFound { id: String },
    PaymentNotFound { id: String },
    /// Transition not present in the lifecycle table
    InvalidTransition {
        resource: String,
        id: String,
        from: String,
        to: String,
    },
    /// Escrow refund attempted outside the refund-eligible states
    EscrowNotRefundable { escrow_id: String, status: String },
    AlreadyExists { resource: String, id: String },
    /// A compare-and-set lost repeatedly against concurrent writers
    ConcurrentModification { resource: String, id: String },
}

/// External collaborators and runtime gates
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        action: String,
        retry_after: Option<u64>,
    },
    /// A kill-switch disabled the feature
    FeatureDisabled { feature: String },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Configuration { message: String },
    /// Unexpected defect
    Internal { message: String },
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Auth(AuthError),
    Validation(ValidationError),
    Domain(DomainError),
    External(ExternalError),
    Infrastructure(InfrastructureError),
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
    pub locale: Locale,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
            locale: Locale::default(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn unauthenticated() -> Self {
        Self::new(AppErrorKind::Auth(AuthError::Unauthenticated))
    }

    pub fn permission_denied(user_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Auth(AuthError::PermissionDenied {
            user_id: user_id.into(),
            resource: resource.into(),
        }))
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.into(),
        }))
    }

    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn booking_not_found(booking_id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::BookingNotFound {
            booking_id: booking_id.into(),
        }))
    }

    pub fn escrow_not_found(id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::EscrowNotFound { id: id.into() }))
    }

    pub fn payment_not_found(id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::PaymentNotFound { id: id.into() }))
    }

    pub fn concurrent_modification(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::ConcurrentModification {
            resource: resource.into(),
            id: id.into(),
        }))
    }

    pub fn invalid_transition(
        resource: impl Into<String>,
        id: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::InvalidTransition {
            resource: resource.into(),
            id: id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
            message: message.into(),
        }))
    }

    /// Map error to the stable code set
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Auth(err) => match err {
                AuthError::Unauthenticated => ErrorCode::Unauthenticated,
                AuthError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            },
            AppErrorKind::Validation(_) => ErrorCode::InvalidArgument,
            AppErrorKind::Domain(err) => match err {
                DomainError::BookingNotFound { .. }
                | DomainError::EscrowNotFound { .. }
                | DomainError::PaymentNotFound { .. } => ErrorCode::NotFound,
                DomainError::InvalidTransition { .. } | DomainError::EscrowNotRefundable { .. } => {
                    ErrorCode::FailedPrecondition
                }
                DomainError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
                DomainError::ConcurrentModification { .. } => ErrorCode::Unavailable,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => {
                    if *is_retryable {
                        ErrorCode::Unavailable
                    } else {
                        ErrorCode::FailedPrecondition
                    }
                }
                ExternalError::RateLimit { .. } => ErrorCode::ResourceExhausted,
                ExternalError::FeatureDisabled { .. } => ErrorCode::Unavailable,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => {
                    if *is_retryable {
                        ErrorCode::Unavailable
                    } else {
                        ErrorCode::Internal
                    }
                }
                InfrastructureError::Cache { .. } => ErrorCode::Unavailable,
                InfrastructureError::Configuration { .. } | InfrastructureError::Internal { .. } => {
                    ErrorCode::Internal
                }
            },
        }
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self.error_code() {
            ErrorCode::Unauthenticated => 401,
            ErrorCode::PermissionDenied => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::AlreadyExists => 409,
            ErrorCode::InvalidArgument => 400,
            ErrorCode::FailedPrecondition => 422,
            ErrorCode::ResourceExhausted => 429,
            ErrorCode::Unavailable => 503,
            ErrorCode::Internal => 500,
        }
    }

    /// Seconds the caller should wait before retrying, when known
    pub fn retry_after(&self) -> Option<u64> {
        match &self.kind {
            AppErrorKind::External(ExternalError::RateLimit { retry_after, .. }) => *retry_after,
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.error_code(),
            ErrorCode::ResourceExhausted | ErrorCode::Unavailable
        )
    }

    /// Developer-facing diagnostic. Logged, never returned to the caller.
    pub fn internal_message(&self) -> String {
        let base = match &self.kind {
            AppErrorKind::Auth(err) => match err {
                AuthError::Unauthenticated => "request carried no authenticated caller".to_string(),
                AuthError::PermissionDenied { user_id, resource } => {
                    format!("user {} is not authorized for {}", user_id, resource)
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => format!("missing field '{}'", field),
                ValidationError::InvalidValue { field, reason } => {
                    format!("invalid value for '{}': {}", field, reason)
                }
            },
            AppErrorKind::Domain(err) => match err {
                DomainError::BookingNotFound { booking_id } => {
                    format!("booking {} not found", booking_id)
                }
                DomainError::EscrowNotFound { id } => format!("escrow {} not found", id),
                DomainError::PaymentNotFound { id } => format!("payment {} not found", id),
                DomainError::InvalidTransition {
                    resource,
                    id,
                    from,
                    to,
                } => format!("illegal {} transition {} -> {} on {}", resource, from, to, id),
                DomainError::EscrowNotRefundable { escrow_id, status } => {
                    format!("escrow {} is not refundable in status {}", escrow_id, status)
                }
                DomainError::AlreadyExists { resource, id } => {
                    format!("{} {} already exists", resource, id)
                }
                DomainError::ConcurrentModification { resource, id } => {
                    format!("{} {} changed concurrently", resource, id)
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider, message, ..
                } => format!("payment provider {} failed: {}", provider, message),
                ExternalError::RateLimit {
                    action,
                    retry_after,
                } => format!("rate limit exceeded for {} (retry after {:?}s)", action, retry_after),
                ExternalError::FeatureDisabled { feature } => {
                    format!("feature '{}' disabled by kill-switch", feature)
                }
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { message, .. } => format!("database: {}", message),
                InfrastructureError::Cache { message } => format!("cache: {}", message),
                InfrastructureError::Configuration { message } => {
                    format!("configuration: {}", message)
                }
                InfrastructureError::Internal { message } => format!("internal: {}", message),
            },
        };
        match &self.context {
            Some(context) => format!("{} ({})", base, context),
            None => base,
        }
    }

    /// Localized message safe to show to the caller
    pub fn user_message(&self) -> String {
        let l = self.locale;
        match &self.kind {
            AppErrorKind::Auth(AuthError::Unauthenticated) => l
                .pick(
                    "You must be signed in to do this.",
                    "Vous devez être connecté pour effectuer cette action.",
                )
                .to_string(),
            AppErrorKind::Auth(AuthError::PermissionDenied { .. }) => l
                .pick(
                    "You are not allowed to perform this action.",
                    "Vous n'êtes pas autorisé à effectuer cette action.",
                )
                .to_string(),
            AppErrorKind::Validation(ValidationError::MissingField { field }) => match l {
                Locale::En => format!("The field '{}' is required.", field),
                Locale::Fr => format!("Le champ '{}' est obligatoire.", field),
            },
            AppErrorKind::Validation(ValidationError::InvalidValue { field, .. }) => match l {
                Locale::En => format!("The field '{}' is invalid.", field),
                Locale::Fr => format!("Le champ '{}' est invalide.", field),
            },
            AppErrorKind::Domain(DomainError::BookingNotFound { .. }) => l
                .pick("This booking could not be found.", "Cette réservation est introuvable.")
                .to_string(),
            AppErrorKind::Domain(DomainError::EscrowNotFound { .. })
            | AppErrorKind::Domain(DomainError::PaymentNotFound { .. }) => l
                .pick("The requested payment record could not be found.", "Le paiement demandé est introuvable.")
                .to_string(),
            AppErrorKind::Domain(DomainError::InvalidTransition { .. }) => l
                .pick(
                    "This action is not possible in the booking's current state.",
                    "Cette action n'est pas possible dans l'état actuel de la réservation.",
                )
                .to_string(),
            AppErrorKind::Domain(DomainError::EscrowNotRefundable { .. }) => l
                .pick(
                    "These funds can no longer be refunded.",
                    "Ces fonds ne peuvent plus être remboursés.",
                )
                .to_string(),
            AppErrorKind::Domain(DomainError::AlreadyExists { .. }) => l
                .pick("This record already exists.", "Cet enregistrement existe déjà.")
                .to_string(),
            AppErrorKind::Domain(DomainError::ConcurrentModification { .. }) => l
                .pick(
                    "This booking was updated at the same time. Please try again.",
                    "Cette réservation a été modifiée simultanément. Veuillez réessayer.",
                )
                .to_string(),
            AppErrorKind::External(ExternalError::PaymentProvider { is_retryable, .. }) => {
                if *is_retryable {
                    l.pick(
                        "The payment service is temporarily unavailable. Please try again.",
                        "Le service de paiement est momentanément indisponible. Veuillez réessayer.",
                    )
                    .to_string()
                } else {
                    l.pick(
                        "The payment could not be processed. Please contact support.",
                        "Le paiement n'a pas pu être traité. Veuillez contacter le support.",
                    )
                    .to_string()
                }
            }
            AppErrorKind::External(ExternalError::RateLimit { retry_after, .. }) => {
                match (l, retry_after) {
                    (Locale::En, Some(secs)) => {
                        format!("Too many requests. Please try again in {} seconds.", secs)
                    }
                    (Locale::Fr, Some(secs)) => {
                        format!("Trop de requêtes. Veuillez réessayer dans {} secondes.", secs)
                    }
                    (Locale::En, None) => "Too many requests. Please try again later.".to_string(),
                    (Locale::Fr, None) => {
                        "Trop de requêtes. Veuillez réessayer plus tard.".to_string()
                    }
                }
            }
            AppErrorKind::External(ExternalError::FeatureDisabled { .. }) => l
                .pick(
                    "This feature is temporarily unavailable. Please try again later.",
                    "Cette fonctionnalité est momentanément indisponible. Veuillez réessayer plus tard.",
                )
                .to_string(),
            AppErrorKind::Infrastructure(_) => {
                if self.error_code() == ErrorCode::Internal {
                    l.pick(
                        "Something went wrong. Please contact support with the request id.",
                        "Une erreur est survenue. Veuillez contacter le support avec l'identifiant de requête.",
                    )
                    .to_string()
                } else {
                    l.pick(
                        "Service temporarily unavailable. Please try again later.",
                        "Service momentanément indisponible. Veuillez réessayer plus tard.",
                    )
                    .to_string()
                }
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_code().as_str(), self.internal_message())
    }
}

impl std::error::Error for AppError {}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_error() {
        let error = AppError::invalid_transition("booking", "b1", "completed", "cancelled");

        assert_eq!(error.error_code(), ErrorCode::FailedPrecondition);
        assert_eq!(error.status_code(), 422);
        assert!(error.internal_message().contains("completed -> cancelled"));
        assert!(!error.user_message().contains("completed"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_rate_limit_error_carries_retry_hint() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            action: "payment_intent".to_string(),
            retry_after: Some(42),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::ResourceExhausted);
        assert_eq!(error.retry_after(), Some(42));
        assert!(error.user_message().contains("42"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_feature_disabled_hides_flag_name() {
        let error = AppError::new(AppErrorKind::External(ExternalError::FeatureDisabled {
            feature: "escrow_auto_release".to_string(),
        }))
        .with_locale(Locale::Fr);

        assert_eq!(error.error_code(), ErrorCode::Unavailable);
        assert!(!error.user_message().contains("escrow_auto_release"));
        assert!(error.user_message().contains("indisponible"));
    }

    #[test]
    fn test_internal_error_is_generic_for_callers() {
        let error = AppError::internal("null pointer in settlement");
        assert_eq!(error.status_code(), 500);
        assert!(!error.user_message().contains("null pointer"));
        assert!(error.to_string().contains("null pointer"));
    }

    #[test]
    fn test_error_codes_serialize_kebab_case() {
        let json = serde_json::to_string(&ErrorCode::FailedPrecondition).unwrap();
        assert_eq!(json, "\"failed-precondition\"");
        assert_eq!(ErrorCode::PermissionDenied.as_str(), "permission-denied");
    }
}
