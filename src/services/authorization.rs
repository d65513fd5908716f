//! Caller identity and role resolution.
//!
//! Claims forwarded by the gateway take precedence; when a caller carries no
//! claims the legacy user-directory fields decide. Supplier ownership always
//! comes from the directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::database::repository::UserDirectory;
use crate::error::{AppError, AppResult};
use crate::locale::Locale;
use crate::models::{ActorRole, Booking};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerClaims {
    #[serde(default)]
    pub admin: Option<bool>,
    #[serde(default)]
    pub role: Option<String>,
}

impl CallerClaims {
    /// `None` when the claims say nothing about admin rights.
    pub fn is_admin(&self) -> Option<bool> {
        match (self.admin, self.role.as_deref()) {
            (Some(admin), _) => Some(admin),
            (None, Some(role)) => Some(role == "admin"),
            (None, None) => None,
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub claims: Option<CallerClaims>,
    pub locale: Locale,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            claims: None,
            locale: Locale::En,
        }
    }

    pub fn with_claims(mut self, claims: CallerClaims) -> Self {
        self.claims = Some(claims);
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleInfo {
    pub is_admin: bool,
    pub is_supplier_owner: bool,
}

#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    async fn role_of(&self, caller: &Caller, supplier_id: Option<&str>) -> AppResult<RoleInfo>;
}

pub struct DirectoryAuthorization {
    users: Arc<dyn UserDirectory>,
}

impl DirectoryAuthorization {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl AuthorizationProvider for DirectoryAuthorization {
    async fn role_of(&self, caller: &Caller, supplier_id: Option<&str>) -> AppResult<RoleInfo> {
        let claimed = caller.claims.as_ref().and_then(CallerClaims::is_admin);
        let is_admin = match claimed {
            Some(admin) => admin,
            None => {
                let role = self.users.user_role(&caller.user_id).await?;
                debug!(user_id = %caller.user_id, role = ?role, "admin check fell back to directory");
                role.as_deref() == Some("admin")
            }
        };

        let is_supplier_owner = match supplier_id {
            Some(supplier_id) => {
                self.users.supplier_owner(supplier_id).await?.as_deref()
                    == Some(caller.user_id.as_str())
            }
            None => false,
        };

        Ok(RoleInfo {
            is_admin,
            is_supplier_owner,
        })
    }
}

/// How a caller relates to one booking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingAccess {
    pub is_client: bool,
    pub is_supplier_owner: bool,
    pub is_admin: bool,
}

impl BookingAccess {
    pub async fn resolve(
        auth: &dyn AuthorizationProvider,
        caller: &Caller,
        booking: &Booking,
    ) -> AppResult<Self> {
        let roles = auth.role_of(caller, Some(&booking.supplier_id)).await?;
        Ok(Self {
            is_client: caller.user_id == booking.client_id,
            is_supplier_owner: roles.is_supplier_owner,
            is_admin: roles.is_admin,
        })
    }

    /// First matching role in the order client, supplier, admin, restricted
    /// to the roles an operation allows.
    pub fn role_among(&self, allowed: &[ActorRole]) -> Option<ActorRole> {
        [
            (ActorRole::Client, self.is_client),
            (ActorRole::Supplier, self.is_supplier_owner),
            (ActorRole::Admin, self.is_admin),
        ]
        .into_iter()
        .find(|(role, held)| *held && allowed.contains(role))
        .map(|(role, _)| role)
    }

    pub fn require(
        &self,
        allowed: &[ActorRole],
        caller: &Caller,
        booking_id: &str,
    ) -> AppResult<ActorRole> {
        self.role_among(allowed).ok_or_else(|| {
            AppError::permission_denied(&caller.user_id, format!("booking {}", booking_id))
        })
    }
}
