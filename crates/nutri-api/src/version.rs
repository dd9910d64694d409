use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use nutri_db::models::VersionRow;
use nutri_types::api::{
    CreateVersionRequest, UpdateVersionRequest, VersionCheckQuery, VersionCheckResponse,
    VersionResponse,
};
use nutri_types::models::Platform;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{blocking, parse_timestamp};

/// The update decision for one client build against the active gate record.
/// Force takes precedence: a client below both thresholds is told to force
/// update, never both.
fn evaluate(v: &VersionRow, client_build: i64) -> VersionCheckResponse {
    let is_force_update = v.is_force_update && client_build < v.min_build_number;
    let is_optional_update =
        v.is_optional_update && client_build < v.build_number && !is_force_update;

    VersionCheckResponse {
        is_force_update,
        is_optional_update,
        update_title: v.update_title.clone(),
        update_message: v.update_message.clone(),
        store_url: v.store_url.clone(),
        latest_version: Some(v.version.clone()),
        latest_build_number: Some(v.build_number),
        min_version: Some(v.min_version.clone()),
        min_build_number: Some(v.min_build_number),
    }
}

/// Public endpoint the mobile apps hit on launch. No active record for the
/// platform means no gate is configured and the client proceeds.
pub async fn check_version(
    State(state): State<AppState>,
    Query(query): Query<VersionCheckQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let platform = query
        .platform
        .as_deref()
        .ok_or_else(|| ApiError::Validation("platform and buildNumber are required".to_string()))?
        .parse::<Platform>()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let client_build: i64 = query
        .build_number
        .as_deref()
        .ok_or_else(|| ApiError::Validation("platform and buildNumber are required".to_string()))?
        .parse()
        .map_err(|_| ApiError::Validation("buildNumber must be a valid number".to_string()))?;

    let db = state.clone();
    let record = blocking(move || db.db.get_active_version(platform.as_str())).await?;

    let decision = match record {
        Some(v) => evaluate(&v, client_build),
        None => VersionCheckResponse::no_gate(),
    };

    Ok(Json(decision))
}

// -- Admin CRUD --

pub async fn list_versions(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let rows = blocking(move || db.db.list_versions()).await?;
    let versions: Vec<VersionResponse> = rows.iter().map(version_response).collect();
    Ok(Json(versions))
}

pub async fn get_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let row = blocking(move || db.db.get_version(&id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("app version"))?;
    Ok(Json(version_response(&row)))
}

pub async fn create_version(
    State(state): State<AppState>,
    Json(req): Json<CreateVersionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let platform = req
        .platform
        .parse::<Platform>()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    validate_version_fields(&req.version, req.build_number, &req.min_version, req.min_build_number)?;

    let id = Uuid::new_v4();
    let row = VersionRow {
        id: id.to_string(),
        platform: platform.as_str().to_string(),
        version: req.version.trim().to_string(),
        build_number: req.build_number,
        min_version: req.min_version.trim().to_string(),
        min_build_number: req.min_build_number,
        is_force_update: req.is_force_update,
        is_optional_update: req.is_optional_update,
        update_title: req.update_title,
        update_message: req.update_message,
        store_url: req.store_url,
        // New records activate by default, displacing the previous gate.
        is_active: req.is_active.unwrap_or(true),
        created_at: String::new(),
        updated_at: String::new(),
    };

    let db = state.clone();
    let stored = blocking(move || {
        db.db.create_version(&row)?;
        db.db.get_version(&row.id)
    })
    .await
    .map_err(ApiError::from_version_write)?
    .ok_or(ApiError::NotFound("app version"))?;

    Ok((StatusCode::CREATED, Json(version_response(&stored))))
}

pub async fn update_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateVersionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let existing = blocking(move || db.db.get_version(&id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("app version"))?;

    // Absent fields keep their stored values.
    let platform = match &req.platform {
        Some(p) => p
            .parse::<Platform>()
            .map_err(|e| ApiError::Validation(e.to_string()))?
            .as_str()
            .to_string(),
        None => existing.platform,
    };
    let merged = VersionRow {
        id: existing.id,
        platform,
        version: req.version.unwrap_or(existing.version),
        build_number: req.build_number.unwrap_or(existing.build_number),
        min_version: req.min_version.unwrap_or(existing.min_version),
        min_build_number: req.min_build_number.unwrap_or(existing.min_build_number),
        is_force_update: req.is_force_update.unwrap_or(existing.is_force_update),
        is_optional_update: req.is_optional_update.unwrap_or(existing.is_optional_update),
        update_title: req.update_title.or(existing.update_title),
        update_message: req.update_message.or(existing.update_message),
        store_url: req.store_url.or(existing.store_url),
        is_active: req.is_active.unwrap_or(existing.is_active),
        created_at: existing.created_at,
        updated_at: existing.updated_at,
    };
    validate_version_fields(
        &merged.version,
        merged.build_number,
        &merged.min_version,
        merged.min_build_number,
    )?;

    let db = state.clone();
    let stored = blocking(move || {
        let found = db.db.replace_version(&merged)?;
        Ok((found, db.db.get_version(&merged.id)?))
    })
    .await
    .map_err(ApiError::from_version_write)?;

    match stored {
        (true, Some(row)) => Ok(Json(version_response(&row))),
        _ => Err(ApiError::NotFound("app version")),
    }
}

pub async fn delete_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let deleted = blocking(move || db.db.delete_version(&id.to_string())).await?;
    if !deleted {
        return Err(ApiError::NotFound("app version"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_version_active(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let row = blocking(move || db.db.toggle_version_active(&id.to_string()))
        .await
        .map_err(ApiError::from_version_write)?
        .ok_or(ApiError::NotFound("app version"))?;
    Ok(Json(version_response(&row)))
}

fn validate_version_fields(
    version: &str,
    build_number: i64,
    min_version: &str,
    min_build_number: i64,
) -> Result<(), ApiError> {
    if version.trim().is_empty() || min_version.trim().is_empty() {
        return Err(ApiError::Validation(
            "version and minVersion must not be empty".to_string(),
        ));
    }
    if build_number < 1 || min_build_number < 1 {
        return Err(ApiError::Validation(
            "build numbers must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn version_response(v: &VersionRow) -> VersionResponse {
    VersionResponse {
        id: v.id.parse().unwrap_or_else(|e| {
            warn!("corrupt version id '{}': {}", v.id, e);
            Uuid::default()
        }),
        platform: v.platform.clone(),
        version: v.version.clone(),
        build_number: v.build_number,
        min_version: v.min_version.clone(),
        min_build_number: v.min_build_number,
        is_force_update: v.is_force_update,
        is_optional_update: v.is_optional_update,
        update_title: v.update_title.clone(),
        update_message: v.update_message.clone(),
        store_url: v.store_url.clone(),
        is_active: v.is_active,
        created_at: parse_timestamp(&v.created_at),
        updated_at: parse_timestamp(&v.updated_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> VersionRow {
        VersionRow {
            id: "11111111-1111-1111-1111-111111111111".to_string(),
            platform: "android".to_string(),
            version: "2.4.0".to_string(),
            build_number: 100,
            min_version: "2.0.0".to_string(),
            min_build_number: 90,
            is_force_update: true,
            is_optional_update: true,
            update_title: Some("Update available".to_string()),
            update_message: None,
            store_url: None,
            is_active: true,
            created_at: "2026-08-01 00:00:00".to_string(),
            updated_at: "2026-08-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn build_below_minimum_is_forced_not_optional() {
        let d = evaluate(&gate(), 80);
        assert!(d.is_force_update);
        assert!(!d.is_optional_update);
    }

    #[test]
    fn build_between_min_and_latest_is_optional() {
        let d = evaluate(&gate(), 95);
        assert!(!d.is_force_update);
        assert!(d.is_optional_update);
    }

    #[test]
    fn current_build_needs_nothing() {
        let d = evaluate(&gate(), 100);
        assert!(!d.is_force_update);
        assert!(!d.is_optional_update);
    }

    #[test]
    fn flags_off_in_record_disable_gating() {
        let mut v = gate();
        v.is_force_update = false;
        v.is_optional_update = false;
        let d = evaluate(&v, 10);
        assert!(!d.is_force_update);
        assert!(!d.is_optional_update);
    }

    #[test]
    fn no_gate_decision_is_fail_open() {
        let d = VersionCheckResponse::no_gate();
        assert!(!d.is_force_update);
        assert!(!d.is_optional_update);
    }

    #[test]
    fn mutation_validation_rejects_bad_fields() {
        assert!(matches!(
            validate_version_fields("", 100, "1.0.0", 90),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validate_version_fields("1.2.0", 100, "  ", 90),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validate_version_fields("1.2.0", 0, "1.0.0", 90),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            validate_version_fields("1.2.0", 100, "1.0.0", 0),
            Err(ApiError::Validation(_))
        ));
        assert!(validate_version_fields("1.2.0", 100, "1.0.0", 90).is_ok());
    }

    #[test]
    fn unknown_platform_is_rejected() {
        assert!("windows".parse::<Platform>().is_err());
        assert!("".parse::<Platform>().is_err());
    }

    #[test]
    fn corrupt_stored_id_defaults_to_nil() {
        let mut v = gate();
        v.id = "not-a-uuid".to_string();
        assert_eq!(version_response(&v).id, Uuid::nil());
    }
}
