use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

use super::auth::Authenticated;
use super::AppState;
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::services::Feature;

#[derive(Debug, Deserialize)]
pub struct SetFlagBody {
    pub enabled: bool,
}

/// PUT /v1/admin/feature-flags/{flag}
pub async fn set_feature_flag(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(flag): Path<String>,
    body: Result<Json<SetFlagBody>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let body = auth.ctx.body(body)?;

    let role = state
        .services
        .auth
        .role_of(&auth.caller, None)
        .await
        .map_err(|e| auth.ctx.reject(e))?;
    if !role.is_admin {
        return Err(auth.ctx.reject(AppError::permission_denied(
            &auth.caller.user_id,
            format!("feature_flag:{}", flag),
        )));
    }

    let feature = Feature::from_str(&flag).map_err(|e| auth.ctx.reject(e))?;
    state
        .services
        .flags
        .set_flag(feature, body.enabled, &auth.caller.user_id)
        .await
        .map_err(|e| auth.ctx.reject(e))?;

    Ok(success_response(json!({
        "flag": feature.as_str(),
        "enabled": body.enabled,
    })))
}
