use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Market, SenderRole, TicketCategory, TicketPriority, TicketStatus,
};

// -- JWT Claims --

/// JWT claims shared between the REST middleware and the auth handlers.
/// Canonical definition lives here in nutri-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    /// Carried in the token so the analysis gate can apply market policy
    /// even when the user store is unreachable.
    pub market: Market,
    pub is_admin: bool,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    /// Defaults to the home market when the client does not say.
    pub market: Option<Market>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Version gate --

/// Raw query parameters for the public version check. Parsed by hand so a
/// missing or non-numeric buildNumber yields a validation error rather than
/// an opaque extractor rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCheckQuery {
    pub platform: Option<String>,
    pub build_number: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionCheckResponse {
    pub is_force_update: bool,
    pub is_optional_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_build_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_build_number: Option<i64>,
}

impl VersionCheckResponse {
    /// The fail-open decision when no gate is configured for a platform.
    pub fn no_gate() -> Self {
        Self {
            is_force_update: false,
            is_optional_update: false,
            update_title: None,
            update_message: None,
            store_url: None,
            latest_version: None,
            latest_build_number: None,
            min_version: None,
            min_build_number: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateVersionRequest {
    pub platform: String,
    pub version: String,
    pub build_number: i64,
    pub min_version: String,
    pub min_build_number: i64,
    #[serde(default)]
    pub is_force_update: bool,
    #[serde(default)]
    pub is_optional_update: bool,
    pub update_title: Option<String>,
    pub update_message: Option<String>,
    pub store_url: Option<String>,
    /// New records activate by default, deactivating any previous active
    /// record for the platform.
    pub is_active: Option<bool>,
}

/// Partial update; absent fields keep their stored values.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateVersionRequest {
    pub platform: Option<String>,
    pub version: Option<String>,
    pub build_number: Option<i64>,
    pub min_version: Option<String>,
    pub min_build_number: Option<i64>,
    pub is_force_update: Option<bool>,
    pub is_optional_update: Option<bool>,
    pub update_title: Option<String>,
    pub update_message: Option<String>,
    pub store_url: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub id: Uuid,
    pub platform: String,
    pub version: String,
    pub build_number: i64,
    pub min_version: String,
    pub min_build_number: i64,
    pub is_force_update: bool,
    pub is_optional_update: bool,
    pub update_title: Option<String>,
    pub update_message: Option<String>,
    pub store_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Analysis --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnalyzeFoodRequest {
    /// Base64-encoded photo of the meal.
    pub image: String,
    /// Optional free-text hint passed through to the analyzer.
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnalyzeDescriptionRequest {
    pub description: String,
}

/// Nutrition estimate returned by the upstream analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodAnalysis {
    pub food_name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub confidence: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub analysis: FoodAnalysis,
    /// Uses remaining after this one; -1 means unlimited.
    pub remaining: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reset_time: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub can_analyze: bool,
    /// -1 means unlimited (active subscription).
    pub remaining: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reset_time: Option<NaiveDateTime>,
    pub requires_subscription: bool,
}

// -- Subscriptions --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GrantSubscriptionRequest {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
}

// -- Tickets --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddMessageRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdatePriorityRequest {
    pub priority: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub user_id: Option<Uuid>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: SenderRole,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject: String,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<TicketMessageResponse>,
    pub last_message_at: DateTime<Utc>,
    pub last_message_by: SenderRole,
    pub user_has_unread: bool,
    pub admin_has_unread: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketListResponse {
    pub items: Vec<TicketResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketStatsResponse {
    pub total_tickets: u64,
    pub status_breakdown: StatusBreakdown,
    pub priority_breakdown: PriorityBreakdown,
    /// Category name -> ticket count.
    pub category_breakdown: std::collections::HashMap<String, u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBreakdown {
    pub open: u64,
    pub in_progress: u64,
    pub resolved: u64,
    pub closed: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityBreakdown {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub urgent: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub count: u64,
}
