//! Caller identity forwarded by the gateway.
//!
//! Token verification happens upstream; this service trusts `x-auth-uid` and
//! the optional JSON `x-auth-claims` header.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::Json;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::locale::Locale;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::authorization::{Caller, CallerClaims};

pub const AUTH_UID_HEADER: &str = "x-auth-uid";
pub const AUTH_CLAIMS_HEADER: &str = "x-auth-claims";

/// Request id and language of the current request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub locale: Locale,
}

impl RequestContext {
    fn from_parts(parts: &Parts) -> Self {
        let locale = Locale::from_accept_language(
            parts
                .headers
                .get(axum::http::header::ACCEPT_LANGUAGE)
                .and_then(|v| v.to_str().ok()),
        );
        Self {
            request_id: get_request_id_from_headers(&parts.headers),
            locale,
        }
    }

    /// Stamps the request id and locale onto an outgoing error.
    pub fn reject(&self, error: AppError) -> AppError {
        let error = error.with_locale(self.locale);
        match &self.request_id {
            Some(id) => error.with_request_id(id.clone()),
            None => error,
        }
    }

    /// Unwraps a JSON body, turning axum's rejection into `invalid-argument`.
    pub fn body<T>(&self, body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
        body.map(|Json(value)| value)
            .map_err(|e| self.reject(AppError::invalid_value("body", e.body_text())))
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// An authenticated caller plus the context its errors are rendered in.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub caller: Caller,
    pub ctx: RequestContext,
}

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = RequestContext::from_parts(parts);

        let uid = parts
            .headers
            .get(AUTH_UID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ctx.reject(AppError::unauthenticated()))?;

        let mut caller = Caller::new(uid).with_locale(ctx.locale);
        if let Some(raw) = parts.headers.get(AUTH_CLAIMS_HEADER) {
            let claims = raw
                .to_str()
                .ok()
                .and_then(|v| serde_json::from_str::<CallerClaims>(v).ok())
                .ok_or_else(|| {
                    warn!(uid = %uid, "malformed caller claims");
                    ctx.reject(AppError::unauthenticated())
                })?;
            caller = caller.with_claims(claims);
        }

        Ok(Self { caller, ctx })
    }
}
