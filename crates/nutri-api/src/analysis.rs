use axum::{Extension, Json, extract::State, response::IntoResponse};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Local;

use nutri_types::api::{
    AnalysisResponse, AnalyzeDescriptionRequest, AnalyzeFoodRequest, Claims, QuotaResponse,
};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::limiter::{self, QuotaDecision, UNLIMITED};

/// Photo analysis: gate, upstream call, then bookkeeping. The increment runs
/// only after the analyzer succeeds so failed analyses are never charged.
pub async fn analyze_food(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AnalyzeFoodRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.image.is_empty() {
        return Err(ApiError::Validation("image is required".to_string()));
    }
    B64.decode(&req.image)
        .map_err(|_| ApiError::Validation("image must be valid base64".to_string()))?;

    let decision = check_quota(&state, &claims).await?;
    deny_if_exhausted(&state, &decision)?;

    let analysis = state
        .analyzer
        .analyze_image(&req.image, req.description.as_deref())
        .await?;

    record_use(&state, &claims).await;

    Ok(Json(AnalysisResponse {
        analysis,
        remaining: remaining_after(&decision),
        next_reset_time: decision.next_reset_time,
    }))
}

/// Text-only analysis. Shares the photo path's quota: both consume the same
/// daily counter.
pub async fn analyze_description(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AnalyzeDescriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.description.trim().is_empty() {
        return Err(ApiError::Validation("description is required".to_string()));
    }

    let decision = check_quota(&state, &claims).await?;
    deny_if_exhausted(&state, &decision)?;

    let analysis = state
        .analyzer
        .analyze_description(req.description.trim())
        .await?;

    record_use(&state, &claims).await;

    Ok(Json(AnalysisResponse {
        analysis,
        remaining: remaining_after(&decision),
        next_reset_time: decision.next_reset_time,
    }))
}

/// Read-only quota report for the client UI; decides without incrementing.
pub async fn get_quota(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = check_quota(&state, &claims).await?;
    Ok(Json(QuotaResponse {
        can_analyze: decision.can_analyze,
        remaining: decision.remaining,
        next_reset_time: decision.next_reset_time,
        requires_subscription: decision.requires_subscription,
    }))
}

/// Runs the gate for the authenticated user. Market policy comes from the
/// token, not the store, so global-market denial holds even when the user
/// table is unreachable.
async fn check_quota(state: &AppState, claims: &Claims) -> Result<QuotaDecision, ApiError> {
    let db = state.clone();
    let user_id = claims.sub.to_string();
    let market = claims.market;
    let limit = state.daily_free_limit;
    let today = Local::now().date_naive();

    let decision = blocking(move || {
        Ok(limiter::check_and_track(&db.db, &user_id, market, limit, today))
    })
    .await?;

    Ok(decision)
}

fn deny_if_exhausted(state: &AppState, decision: &QuotaDecision) -> Result<(), ApiError> {
    if decision.can_analyze {
        return Ok(());
    }
    if decision.requires_subscription {
        return Err(ApiError::SubscriptionRequired {
            message: "AI analysis requires an active subscription in your region".to_string(),
        });
    }
    let reset_at = decision
        .next_reset_time
        .unwrap_or_else(|| Local::now().naive_local());
    Err(ApiError::DailyLimitReached {
        message: format!(
            "You've reached your daily limit ({} analyses). Resets tomorrow at midnight. Subscribe for unlimited analysis.",
            state.daily_free_limit
        ),
        reset_at,
    })
}

/// Post-success bookkeeping; failures are logged inside `record_analysis`
/// and never fail the request.
async fn record_use(state: &AppState, claims: &Claims) {
    let db = state.clone();
    let user_id = claims.sub.to_string();
    let today = Local::now().date_naive();
    let _ = blocking(move || {
        limiter::record_analysis(&db.db, &user_id, today);
        Ok(())
    })
    .await;
}

fn remaining_after(decision: &QuotaDecision) -> i64 {
    if decision.remaining == UNLIMITED {
        UNLIMITED
    } else {
        (decision.remaining - 1).max(0)
    }
}
