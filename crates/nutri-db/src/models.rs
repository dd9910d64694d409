//! Database row types that map directly to SQLite rows. Distinct from the
//! nutri-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub market: String,
    pub is_admin: bool,
    pub created_at: String,
}

pub struct VersionRow {
    pub id: String,
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
    pub created_at: String,
    pub updated_at: String,
}

pub struct SubscriptionRow {
    pub id: String,
    pub user_id: String,
    pub is_active: bool,
    pub expires_at: String,
    pub created_at: String,
}

pub struct TicketRow {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub last_message_at: String,
    pub last_message_by: String,
    pub user_has_unread: bool,
    pub admin_has_unread: bool,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct TicketMessageRow {
    pub id: String,
    pub ticket_id: String,
    pub sender_id: String,
    pub sender_role: String,
    pub body: String,
    pub created_at: String,
}

/// Aggregate counts for the admin ticket dashboard.
pub struct TicketStats {
    pub total: u64,
    pub by_status: Vec<(String, u64)>,
    pub by_priority: Vec<(String, u64)>,
    pub by_category: Vec<(String, u64)>,
}

/// Filters for the admin ticket list. `user_id = None` lists all users.
#[derive(Default)]
pub struct TicketFilter {
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
}
