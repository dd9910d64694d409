use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use uuid::Uuid;

use nutri_types::api::{GrantSubscriptionRequest, SubscriptionResponse};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;

/// Admin grant. Purchase verification against the store backends happens in
/// a separate billing pipeline; this endpoint records the entitlement the
/// analysis limiter consults.
pub async fn grant_subscription(
    State(state): State<AppState>,
    Json(req): Json<GrantSubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.expires_at <= chrono::Utc::now() {
        return Err(ApiError::Validation(
            "expiresAt must be in the future".to_string(),
        ));
    }

    let id = Uuid::new_v4();
    let db = state.clone();
    let user_id = req.user_id.to_string();
    let expires_at = req.expires_at.to_rfc3339();
    let sub_id = id.to_string();

    blocking(move || {
        if db.db.get_user_by_id(&user_id)?.is_none() {
            return Ok(false);
        }
        db.db.grant_subscription(&sub_id, &user_id, &expires_at)?;
        Ok(true)
    })
    .await?
    .then_some(())
    .ok_or(ApiError::NotFound("user"))?;

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionResponse {
            id,
            user_id: req.user_id,
            is_active: true,
            expires_at: req.expires_at,
        }),
    ))
}
