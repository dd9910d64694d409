use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use nutri_db::models::{TicketFilter, TicketMessageRow, TicketRow};
use nutri_types::api::{
    AddMessageRequest, Claims, CreateTicketRequest, Pagination, TicketListQuery,
    TicketListResponse, TicketMessageResponse, TicketResponse, TicketStatsResponse,
    PriorityBreakdown, StatusBreakdown, UnreadCountResponse, UpdatePriorityRequest,
    UpdateStatusRequest,
};
use nutri_types::models::{
    SenderRole, TicketCategory, TicketPriority, TicketStatus,
};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::parse_timestamp;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let subject = validate_subject(&req.subject)?;
    let body = req.message.trim().to_string();
    if body.is_empty() {
        return Err(ApiError::Validation("message is required".to_string()));
    }
    let category = match req.category.as_deref() {
        Some(c) => c
            .parse::<TicketCategory>()
            .map_err(|e| ApiError::Validation(e.to_string()))?,
        None => TicketCategory::General,
    };
    let priority = match req.priority.as_deref() {
        Some(p) => p
            .parse::<TicketPriority>()
            .map_err(|e| ApiError::Validation(e.to_string()))?,
        None => TicketPriority::Medium,
    };

    let now = Utc::now().to_rfc3339();
    let ticket_id = Uuid::new_v4();
    let ticket = TicketRow {
        id: ticket_id.to_string(),
        user_id: claims.sub.to_string(),
        subject,
        category: category.as_str().to_string(),
        priority: priority.as_str().to_string(),
        status: TicketStatus::Open.as_str().to_string(),
        last_message_at: now.clone(),
        last_message_by: SenderRole::User.as_str().to_string(),
        user_has_unread: false,
        admin_has_unread: true,
        resolved_at: None,
        closed_at: None,
        created_at: String::new(),
        updated_at: String::new(),
    };
    let first = TicketMessageRow {
        id: Uuid::new_v4().to_string(),
        ticket_id: ticket_id.to_string(),
        sender_id: claims.sub.to_string(),
        sender_role: SenderRole::User.as_str().to_string(),
        body,
        created_at: now,
    };

    let db = state.clone();
    let response = blocking(move || {
        db.db.create_ticket(&ticket, &first)?;
        load_ticket_response(&db, &ticket.id)
    })
    .await?
    .ok_or(ApiError::NotFound("ticket"))?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// The caller's own tickets, newest activity first.
pub async fn list_my_tickets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<TicketListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, limit) = page_and_limit(&query);
    let filter = TicketFilter {
        user_id: Some(claims.sub.to_string()),
        status: parse_filter::<TicketStatus>(query.status.as_deref())?,
        ..Default::default()
    };

    let db = state.clone();
    let (rows, total) = blocking(move || db.db.list_tickets(&filter, page, limit)).await?;
    Ok(Json(list_response(rows, total, page, limit)))
}

/// Admin list with the full filter set.
pub async fn admin_list_tickets(
    State(state): State<AppState>,
    Query(query): Query<TicketListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, limit) = page_and_limit(&query);
    let filter = TicketFilter {
        user_id: query.user_id.map(|u| u.to_string()),
        status: parse_filter::<TicketStatus>(query.status.as_deref())?,
        priority: parse_filter::<TicketPriority>(query.priority.as_deref())?,
        category: parse_filter::<TicketCategory>(query.category.as_deref())?,
        search: query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
    };

    let db = state.clone();
    let (rows, total) = blocking(move || db.db.list_tickets(&filter, page, limit)).await?;
    Ok(Json(list_response(rows, total, page, limit)))
}

/// Fetch a thread. Reading as the party with unseen messages clears that
/// party's unread flag (the notification badge contract), so this is a
/// mark-read-and-fetch, not a pure getter.
pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = viewer_role(&claims);
    let user_id = claims.sub.to_string();

    let db = state.clone();
    let response = blocking(move || {
        let Some(ticket) = db.db.get_ticket(&id.to_string())? else {
            return Ok(Err(ApiError::NotFound("ticket")));
        };
        if viewer != SenderRole::Admin && ticket.user_id != user_id {
            return Ok(Err(ApiError::Forbidden));
        }
        db.db.mark_ticket_read(&ticket.id, viewer.as_str())?;
        match load_ticket_response(&db, &ticket.id)? {
            Some(r) => Ok(Ok(r)),
            None => Ok(Err(ApiError::NotFound("ticket"))),
        }
    })
    .await??;

    Ok(Json(response))
}

pub async fn add_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let body = req.message.trim().to_string();
    if body.is_empty() {
        return Err(ApiError::Validation("message is required".to_string()));
    }

    let sender = viewer_role(&claims);
    let sender_id = claims.sub.to_string();

    let db = state.clone();
    let response = blocking(move || {
        let Some(ticket) = db.db.get_ticket(&id.to_string())? else {
            return Ok(Err(ApiError::NotFound("ticket")));
        };
        if sender != SenderRole::Admin && ticket.user_id != sender_id {
            return Ok(Err(ApiError::Forbidden));
        }
        db.db.append_ticket_message(&TicketMessageRow {
            id: Uuid::new_v4().to_string(),
            ticket_id: ticket.id.clone(),
            sender_id,
            sender_role: sender.as_str().to_string(),
            body,
            created_at: Utc::now().to_rfc3339(),
        })?;
        match load_ticket_response(&db, &ticket.id)? {
            Some(r) => Ok(Ok(r)),
            None => Ok(Err(ApiError::NotFound("ticket"))),
        }
    })
    .await??;

    Ok(Json(response))
}

/// Admin-commanded status set; any target status is legal.
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status = req
        .status
        .parse::<TicketStatus>()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let db = state.clone();
    let response = blocking(move || {
        let found =
            db.db
                .set_ticket_status(&id.to_string(), status.as_str(), &Utc::now().to_rfc3339())?;
        if !found {
            return Ok(None);
        }
        load_ticket_response(&db, &id.to_string())
    })
    .await?
    .ok_or(ApiError::NotFound("ticket"))?;

    Ok(Json(response))
}

pub async fn update_priority(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePriorityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let priority = req
        .priority
        .parse::<TicketPriority>()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let db = state.clone();
    let response = blocking(move || {
        let found = db.db.set_ticket_priority(&id.to_string(), priority.as_str())?;
        if !found {
            return Ok(None);
        }
        load_ticket_response(&db, &id.to_string())
    })
    .await?
    .ok_or(ApiError::NotFound("ticket"))?;

    Ok(Json(response))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let deleted = blocking(move || db.db.delete_ticket(&id.to_string())).await?;
    if !deleted {
        return Err(ApiError::NotFound("ticket"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_statistics(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let stats = blocking(move || db.db.ticket_stats()).await?;

    let by = |counts: &[(String, u64)], key: &str| -> u64 {
        counts
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };

    Ok(Json(TicketStatsResponse {
        total_tickets: stats.total,
        status_breakdown: StatusBreakdown {
            open: by(&stats.by_status, "open"),
            in_progress: by(&stats.by_status, "in_progress"),
            resolved: by(&stats.by_status, "resolved"),
            closed: by(&stats.by_status, "closed"),
        },
        priority_breakdown: PriorityBreakdown {
            low: by(&stats.by_priority, "low"),
            medium: by(&stats.by_priority, "medium"),
            high: by(&stats.by_priority, "high"),
            urgent: by(&stats.by_priority, "urgent"),
        },
        category_breakdown: stats.by_category.into_iter().collect(),
    }))
}

/// Admin badge: tickets with an unseen user message.
pub async fn admin_unread_count(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let count = blocking(move || db.db.admin_unread_count()).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// User badge: the caller's tickets with an unseen admin reply.
pub async fn my_unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user_id = claims.sub.to_string();
    let count = blocking(move || db.db.user_unread_count(&user_id)).await?;
    Ok(Json(UnreadCountResponse { count }))
}

fn viewer_role(claims: &Claims) -> SenderRole {
    if claims.is_admin {
        SenderRole::Admin
    } else {
        SenderRole::User
    }
}

/// Bounds are in characters, not bytes, so multibyte subjects are measured
/// the way the client counts them.
fn validate_subject(raw: &str) -> Result<String, ApiError> {
    let subject = raw.trim().to_string();
    let chars = subject.chars().count();
    if chars < 3 || chars > 200 {
        return Err(ApiError::Validation(
            "subject must be between 3 and 200 characters".to_string(),
        ));
    }
    Ok(subject)
}

fn page_and_limit(query: &TicketListQuery) -> (u32, u32) {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, limit)
}

/// Validates an optional enum filter and hands the raw string through to the
/// query layer.
fn parse_filter<T>(raw: Option<&str>) -> Result<Option<String>, ApiError>
where
    T: std::str::FromStr<Err = nutri_types::models::ParseEnumError>,
{
    match raw {
        None => Ok(None),
        Some(s) => {
            s.parse::<T>()
                .map_err(|e| ApiError::Validation(e.to_string()))?;
            Ok(Some(s.to_string()))
        }
    }
}

fn list_response(rows: Vec<TicketRow>, total: u64, page: u32, limit: u32) -> TicketListResponse {
    TicketListResponse {
        items: rows.iter().map(|t| ticket_response(t, Vec::new())).collect(),
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit as u64),
        },
    }
}

fn load_ticket_response(
    state: &AppState,
    ticket_id: &str,
) -> anyhow::Result<Option<TicketResponse>> {
    let Some(ticket) = state.db.get_ticket(ticket_id)? else {
        return Ok(None);
    };
    let messages = state.db.get_ticket_messages(ticket_id)?;
    Ok(Some(ticket_response(&ticket, messages)))
}

/// Row-to-wire conversion. Stored enum/id fields are trusted but logged and
/// defaulted when corrupt, the same way the rest of the read paths behave.
fn ticket_response(t: &TicketRow, messages: Vec<TicketMessageRow>) -> TicketResponse {
    let messages = messages
        .iter()
        .map(|m| TicketMessageResponse {
            id: parse_id(&m.id, "message id"),
            sender_id: parse_id(&m.sender_id, "sender id"),
            sender_role: m.sender_role.parse().unwrap_or_else(|e| {
                warn!("corrupt sender role on message '{}': {}", m.id, e);
                SenderRole::User
            }),
            message: m.body.clone(),
            created_at: parse_timestamp(&m.created_at),
        })
        .collect();

    TicketResponse {
        id: parse_id(&t.id, "ticket id"),
        user_id: parse_id(&t.user_id, "user id"),
        subject: t.subject.clone(),
        category: t.category.parse().unwrap_or_else(|e| {
            warn!("corrupt category on ticket '{}': {}", t.id, e);
            TicketCategory::General
        }),
        priority: t.priority.parse().unwrap_or_else(|e| {
            warn!("corrupt priority on ticket '{}': {}", t.id, e);
            TicketPriority::Medium
        }),
        status: t.status.parse().unwrap_or_else(|e| {
            warn!("corrupt status on ticket '{}': {}", t.id, e);
            TicketStatus::Open
        }),
        messages,
        last_message_at: parse_timestamp(&t.last_message_at),
        last_message_by: t.last_message_by.parse().unwrap_or_else(|e| {
            warn!("corrupt last_message_by on ticket '{}': {}", t.id, e);
            SenderRole::User
        }),
        user_has_unread: t.user_has_unread,
        admin_has_unread: t.admin_has_unread,
        resolved_at: t.resolved_at.as_deref().map(parse_timestamp),
        closed_at: t.closed_at.as_deref().map(parse_timestamp),
        created_at: parse_timestamp(&t.created_at),
    }
}

fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_bounds_count_characters_not_bytes() {
        // 70 characters but 210 bytes
        let multibyte = "食".repeat(70);
        assert!(validate_subject(&multibyte).is_ok());

        assert!(validate_subject("hi").is_err());
        assert!(validate_subject(&"x".repeat(200)).is_ok());
        assert!(validate_subject(&"x".repeat(201)).is_err());
        assert_eq!(validate_subject("  trimmed subject  ").unwrap(), "trimmed subject");
    }
}
