use anyhow::Result;
use rusqlite::Connection;

use crate::Database;
use crate::models::{
    SubscriptionRow, TicketFilter, TicketMessageRow, TicketRow, TicketStats, UserRow, VersionRow,
};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        market: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, market) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, market),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, market, is_admin, created_at
                 FROM users WHERE username = ?1",
            )?;
            stmt.query_row([username], map_user_row).optional()
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, market, is_admin, created_at
                 FROM users WHERE id = ?1",
            )?;
            stmt.query_row([id], map_user_row).optional()
        })
    }

    /// Test/bootstrap helper; admin accounts are otherwise provisioned
    /// directly in the database.
    pub fn set_user_admin(&self, id: &str, is_admin: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET is_admin = ?2 WHERE id = ?1",
                (id, is_admin),
            )?;
            Ok(())
        })
    }

    // -- App versions --

    pub fn list_versions(&self) -> Result<Vec<VersionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM app_versions ORDER BY created_at DESC, id"
            ))?;
            let rows = stmt
                .query_map([], map_version_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_version(&self, id: &str) -> Result<Option<VersionRow>> {
        self.with_conn(|conn| query_version_by_id(conn, id))
    }

    /// The one record the public version check consults. Returns `None` when
    /// no gate is configured for the platform (fail-open).
    pub fn get_active_version(&self, platform: &str) -> Result<Option<VersionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM app_versions
                 WHERE platform = ?1 AND is_active = 1"
            ))?;
            stmt.query_row([platform], map_version_row).optional()
        })
    }

    /// Inserts a version record. When the record activates, every other
    /// active record for the platform is deactivated in the same transaction;
    /// the partial unique index rejects any racing writer with a constraint
    /// violation (surfaced to callers as a conflict).
    pub fn create_version(&self, v: &VersionRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if v.is_active {
                deactivate_other_versions(&tx, &v.platform, &v.id)?;
            }
            tx.execute(
                "INSERT INTO app_versions
                   (id, platform, version, build_number, min_version, min_build_number,
                    is_force_update, is_optional_update, update_title, update_message,
                    store_url, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    v.id,
                    v.platform,
                    v.version,
                    v.build_number,
                    v.min_version,
                    v.min_build_number,
                    v.is_force_update,
                    v.is_optional_update,
                    v.update_title,
                    v.update_message,
                    v.store_url,
                    v.is_active,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Writes a fully merged record over an existing row. Returns false when
    /// the row no longer exists.
    pub fn replace_version(&self, v: &VersionRow) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if v.is_active {
                deactivate_other_versions(&tx, &v.platform, &v.id)?;
            }
            let affected = tx.execute(
                "UPDATE app_versions SET
                   platform = ?2, version = ?3, build_number = ?4, min_version = ?5,
                   min_build_number = ?6, is_force_update = ?7, is_optional_update = ?8,
                   update_title = ?9, update_message = ?10, store_url = ?11,
                   is_active = ?12, updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![
                    v.id,
                    v.platform,
                    v.version,
                    v.build_number,
                    v.min_version,
                    v.min_build_number,
                    v.is_force_update,
                    v.is_optional_update,
                    v.update_title,
                    v.update_message,
                    v.store_url,
                    v.is_active,
                ],
            )?;
            tx.commit()?;
            Ok(affected > 0)
        })
    }

    /// Flips a record's active flag. Activating deactivates every other
    /// record for the same platform first.
    pub fn toggle_version_active(&self, id: &str) -> Result<Option<VersionRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(current) = query_version_by_id(&tx, id)? else {
                return Ok(None);
            };
            if !current.is_active {
                deactivate_other_versions(&tx, &current.platform, id)?;
            }
            tx.execute(
                "UPDATE app_versions SET is_active = ?2, updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![id, !current.is_active],
            )?;
            let updated = query_version_by_id(&tx, id)?;
            tx.commit()?;
            Ok(updated)
        })
    }

    pub fn delete_version(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute("DELETE FROM app_versions WHERE id = ?1", [id])?;
            Ok(affected > 0)
        })
    }

    // -- Daily analysis counters --

    /// Reads today's counter, creating the zero row on a user's first
    /// attempt of the day. `date` is the server-local YYYY-MM-DD day.
    pub fn get_or_create_counter(&self, user_id: &str, date: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO daily_analysis_limits (user_id, date)
                 VALUES (?1, ?2)
                 ON CONFLICT(user_id, date) DO NOTHING",
                (user_id, date),
            )?;
            let count = conn.query_row(
                "SELECT analysis_count FROM daily_analysis_limits
                 WHERE user_id = ?1 AND date = ?2",
                (user_id, date),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Atomic increment-on-upsert; concurrent analyses on the same day
    /// cannot lose updates.
    pub fn increment_analysis_count(&self, user_id: &str, date: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO daily_analysis_limits (user_id, date, analysis_count)
                 VALUES (?1, ?2, 1)
                 ON CONFLICT(user_id, date)
                 DO UPDATE SET analysis_count = analysis_count + 1",
                (user_id, date),
            )?;
            Ok(())
        })
    }

    /// Retention: drops counter rows older than the cutoff day. YYYY-MM-DD
    /// strings compare correctly as text.
    pub fn prune_counters_before(&self, cutoff_date: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute(
                "DELETE FROM daily_analysis_limits WHERE date < ?1",
                [cutoff_date],
            )?;
            Ok(affected)
        })
    }

    // -- Subscriptions --

    pub fn grant_subscription(&self, id: &str, user_id: &str, expires_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO subscriptions (id, user_id, expires_at) VALUES (?1, ?2, ?3)",
                (id, user_id, expires_at),
            )?;
            Ok(())
        })
    }

    /// Active, unexpired subscription if the user has one. `now` is an
    /// RFC 3339 UTC timestamp; expires_at rows are stored the same way, so
    /// text comparison is chronological.
    pub fn get_active_subscription(&self, user_id: &str, now: &str) -> Result<Option<SubscriptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, is_active, expires_at, created_at
                 FROM subscriptions
                 WHERE user_id = ?1 AND is_active = 1 AND expires_at > ?2
                 ORDER BY expires_at DESC
                 LIMIT 1",
            )?;
            stmt.query_row((user_id, now), |row| {
                Ok(SubscriptionRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    is_active: row.get(2)?,
                    expires_at: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .optional()
        })
    }

    // -- Tickets --

    /// Creates the ticket and its first message in one transaction.
    pub fn create_ticket(&self, t: &TicketRow, first: &TicketMessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO tickets
                   (id, user_id, subject, category, priority, status,
                    last_message_at, last_message_by, user_has_unread, admin_has_unread)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    t.id,
                    t.user_id,
                    t.subject,
                    t.category,
                    t.priority,
                    t.status,
                    t.last_message_at,
                    t.last_message_by,
                    t.user_has_unread,
                    t.admin_has_unread,
                ],
            )?;
            insert_message(&tx, first)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_ticket(&self, id: &str) -> Result<Option<TicketRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"
            ))?;
            stmt.query_row([id], map_ticket_row).optional()
        })
    }

    pub fn get_ticket_messages(&self, ticket_id: &str) -> Result<Vec<TicketMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ticket_id, sender_id, sender_role, body, created_at
                 FROM ticket_messages WHERE ticket_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map([ticket_id], |row| {
                    Ok(TicketMessageRow {
                        id: row.get(0)?,
                        ticket_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        sender_role: row.get(3)?,
                        body: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Clears the viewing party's unread flag. Part of the read contract of
    /// GET ticket-by-id: the viewer's badge goes out, the other party's stays.
    pub fn mark_ticket_read(&self, id: &str, viewer_role: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let sql = match viewer_role {
                "admin" => "UPDATE tickets SET admin_has_unread = 0 WHERE id = ?1",
                _ => "UPDATE tickets SET user_has_unread = 0 WHERE id = ?1",
            };
            conn.execute(sql, [id])?;
            Ok(())
        })
    }

    /// Appends a message and applies the thread bookkeeping in one
    /// transaction: last-message fields, the recipient's unread flag set and
    /// the sender's cleared, and the open -> in_progress auto-advance when an
    /// admin replies to an open ticket.
    pub fn append_ticket_message(&self, m: &TicketMessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            insert_message(&tx, m)?;
            let is_admin = m.sender_role == "admin";
            tx.execute(
                "UPDATE tickets SET
                   last_message_at = ?2,
                   last_message_by = ?3,
                   user_has_unread = ?4,
                   admin_has_unread = ?5,
                   status = CASE WHEN ?6 AND status = 'open' THEN 'in_progress' ELSE status END,
                   updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![
                    m.ticket_id,
                    m.created_at,
                    m.sender_role,
                    is_admin,
                    !is_admin,
                    is_admin,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Admin-commanded status set; any value is reachable from any state.
    /// First entry into resolved/closed stamps the timestamp and never
    /// overwrites it on re-entry.
    pub fn set_ticket_status(&self, id: &str, status: &str, now: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute(
                "UPDATE tickets SET
                   status = ?2,
                   resolved_at = CASE WHEN ?2 = 'resolved'
                                      THEN COALESCE(resolved_at, ?3)
                                      ELSE resolved_at END,
                   closed_at = CASE WHEN ?2 = 'closed'
                                    THEN COALESCE(closed_at, ?3)
                                    ELSE closed_at END,
                   updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![id, status, now],
            )?;
            Ok(affected > 0)
        })
    }

    pub fn set_ticket_priority(&self, id: &str, priority: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute(
                "UPDATE tickets SET priority = ?2, updated_at = datetime('now') WHERE id = ?1",
                (id, priority),
            )?;
            Ok(affected > 0)
        })
    }

    pub fn delete_ticket(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            // ON DELETE CASCADE drops the message rows
            let affected = conn.execute("DELETE FROM tickets WHERE id = ?1", [id])?;
            Ok(affected > 0)
        })
    }

    /// Filtered, paginated ticket list ordered by most recent activity.
    /// Returns the page plus the total match count for pagination metadata.
    pub fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<TicketRow>, u64)> {
        self.with_conn(|conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(user_id) = &filter.user_id {
                clauses.push("user_id = ?");
                params.push(Box::new(user_id.clone()));
            }
            if let Some(status) = &filter.status {
                clauses.push("status = ?");
                params.push(Box::new(status.clone()));
            }
            if let Some(priority) = &filter.priority {
                clauses.push("priority = ?");
                params.push(Box::new(priority.clone()));
            }
            if let Some(category) = &filter.category {
                clauses.push("category = ?");
                params.push(Box::new(category.clone()));
            }
            if let Some(search) = &filter.search {
                clauses.push("subject LIKE ?");
                params.push(Box::new(format!("%{}%", search)));
            }

            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let total: u64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM tickets{where_sql}"),
                param_refs.as_slice(),
                |row| row.get(0),
            )?;

            let offset = (page.saturating_sub(1) as i64) * limit as i64;
            let mut stmt = conn.prepare(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets{where_sql}
                 ORDER BY last_message_at DESC, id
                 LIMIT {limit} OFFSET {offset}"
            ))?;
            let rows = stmt
                .query_map(param_refs.as_slice(), map_ticket_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total))
        })
    }

    pub fn ticket_stats(&self) -> Result<TicketStats> {
        self.with_conn(|conn| {
            let total: u64 = conn.query_row("SELECT COUNT(*) FROM tickets", [], |row| row.get(0))?;
            Ok(TicketStats {
                total,
                by_status: group_counts(conn, "status")?,
                by_priority: group_counts(conn, "priority")?,
                by_category: group_counts(conn, "category")?,
            })
        })
    }

    /// Tickets carrying an unseen user message, for the admin badge.
    pub fn admin_unread_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM tickets WHERE admin_has_unread = 1",
                [],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// The caller's tickets carrying an unseen admin reply.
    pub fn user_unread_count(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM tickets WHERE user_id = ?1 AND user_has_unread = 1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

const VERSION_COLUMNS: &str = "id, platform, version, build_number, min_version, \
     min_build_number, is_force_update, is_optional_update, update_title, \
     update_message, store_url, is_active, created_at, updated_at";

const TICKET_COLUMNS: &str = "id, user_id, subject, category, priority, status, \
     last_message_at, last_message_by, user_has_unread, admin_has_unread, \
     resolved_at, closed_at, created_at, updated_at";

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        market: row.get(3)?,
        is_admin: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_version_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok(VersionRow {
        id: row.get(0)?,
        platform: row.get(1)?,
        version: row.get(2)?,
        build_number: row.get(3)?,
        min_version: row.get(4)?,
        min_build_number: row.get(5)?,
        is_force_update: row.get(6)?,
        is_optional_update: row.get(7)?,
        update_title: row.get(8)?,
        update_message: row.get(9)?,
        store_url: row.get(10)?,
        is_active: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn map_ticket_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TicketRow> {
    Ok(TicketRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        subject: row.get(2)?,
        category: row.get(3)?,
        priority: row.get(4)?,
        status: row.get(5)?,
        last_message_at: row.get(6)?,
        last_message_by: row.get(7)?,
        user_has_unread: row.get(8)?,
        admin_has_unread: row.get(9)?,
        resolved_at: row.get(10)?,
        closed_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn query_version_by_id(conn: &Connection, id: &str) -> Result<Option<VersionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VERSION_COLUMNS} FROM app_versions WHERE id = ?1"
    ))?;
    stmt.query_row([id], map_version_row).optional()
}

fn deactivate_other_versions(conn: &Connection, platform: &str, keep_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE app_versions SET is_active = 0, updated_at = datetime('now')
         WHERE platform = ?1 AND is_active = 1 AND id != ?2",
        (platform, keep_id),
    )?;
    Ok(())
}

fn insert_message(conn: &Connection, m: &TicketMessageRow) -> Result<()> {
    conn.execute(
        "INSERT INTO ticket_messages (id, ticket_id, sender_id, sender_role, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![m.id, m.ticket_id, m.sender_id, m.sender_role, m.body, m.created_at],
    )?;
    Ok(())
}

fn group_counts(conn: &Connection, column: &str) -> Result<Vec<(String, u64)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM tickets GROUP BY {column}"
    ))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_unique_violation;
    use uuid::Uuid;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn make_user(db: &Database, market: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, &format!("user-{id}"), "hash", market)
            .unwrap();
        id
    }

    fn version(platform: &str, active: bool) -> VersionRow {
        VersionRow {
            id: Uuid::new_v4().to_string(),
            platform: platform.to_string(),
            version: "1.2.0".to_string(),
            build_number: 100,
            min_version: "1.0.0".to_string(),
            min_build_number: 90,
            is_force_update: true,
            is_optional_update: true,
            update_title: None,
            update_message: None,
            store_url: None,
            is_active: active,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn active_count(db: &Database, platform: &str) -> usize {
        db.list_versions()
            .unwrap()
            .iter()
            .filter(|v| v.platform == platform && v.is_active)
            .count()
    }

    #[test]
    fn admin_flag_is_persisted() {
        let db = test_db();
        let user = make_user(&db, "home");
        assert!(!db.get_user_by_id(&user).unwrap().unwrap().is_admin);
        db.set_user_admin(&user, true).unwrap();
        assert!(db.get_user_by_id(&user).unwrap().unwrap().is_admin);
    }

    #[test]
    fn creating_active_version_deactivates_previous() {
        let db = test_db();
        let v1 = version("android", true);
        let v2 = version("android", true);
        db.create_version(&v1).unwrap();
        db.create_version(&v2).unwrap();

        assert_eq!(active_count(&db, "android"), 1);
        assert!(db.get_version(&v2.id).unwrap().unwrap().is_active);
        assert!(!db.get_version(&v1.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn duplicate_active_insert_is_a_unique_violation() {
        let db = test_db();
        db.create_version(&version("ios", true)).unwrap();

        // Bypass the deactivate step to simulate a racing writer.
        let v = version("ios", true);
        let err = db
            .with_conn_mut(|conn| {
                conn.execute(
                    "INSERT INTO app_versions
                       (id, platform, version, build_number, min_version,
                        min_build_number, is_active)
                     VALUES (?1, 'ios', '9.9.9', 999, '9.0.0', 900, 1)",
                    [&v.id],
                )?;
                Ok(())
            })
            .unwrap_err();
        assert!(is_unique_violation(&err));
        assert_eq!(active_count(&db, "ios"), 1);
    }

    #[test]
    fn toggle_twice_restores_original_state() {
        let db = test_db();
        let v1 = version("android", true);
        let v2 = version("android", false);
        db.create_version(&v1).unwrap();
        db.create_version(&v2).unwrap();

        let toggled = db.toggle_version_active(&v2.id).unwrap().unwrap();
        assert!(toggled.is_active);
        assert_eq!(active_count(&db, "android"), 1);

        let toggled = db.toggle_version_active(&v2.id).unwrap().unwrap();
        assert!(!toggled.is_active);
        // v1 stays deactivated from the first toggle; nothing is active now,
        // but there are never two active records.
        assert!(active_count(&db, "android") <= 1);
    }

    #[test]
    fn active_lookup_ignores_other_platform() {
        let db = test_db();
        db.create_version(&version("android", true)).unwrap();
        assert!(db.get_active_version("ios").unwrap().is_none());
        assert!(db.get_active_version("android").unwrap().is_some());
    }

    #[test]
    fn counter_starts_at_zero_and_increments() {
        let db = test_db();
        let user = make_user(&db, "home");

        assert_eq!(db.get_or_create_counter(&user, "2026-08-25").unwrap(), 0);
        db.increment_analysis_count(&user, "2026-08-25").unwrap();
        db.increment_analysis_count(&user, "2026-08-25").unwrap();
        assert_eq!(db.get_or_create_counter(&user, "2026-08-25").unwrap(), 2);
    }

    #[test]
    fn yesterdays_counter_does_not_leak_into_today() {
        let db = test_db();
        let user = make_user(&db, "home");

        db.increment_analysis_count(&user, "2026-08-24").unwrap();
        db.increment_analysis_count(&user, "2026-08-24").unwrap();
        assert_eq!(db.get_or_create_counter(&user, "2026-08-25").unwrap(), 0);
    }

    #[test]
    fn prune_removes_only_stale_counters() {
        let db = test_db();
        let user = make_user(&db, "home");

        db.increment_analysis_count(&user, "2026-07-01").unwrap();
        db.increment_analysis_count(&user, "2026-08-25").unwrap();

        let pruned = db.prune_counters_before("2026-08-01").unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(db.get_or_create_counter(&user, "2026-08-25").unwrap(), 1);
    }

    #[test]
    fn expired_subscription_is_not_active() {
        let db = test_db();
        let user = make_user(&db, "home");

        db.grant_subscription(
            &Uuid::new_v4().to_string(),
            &user,
            "2026-01-01T00:00:00+00:00",
        )
        .unwrap();
        assert!(
            db.get_active_subscription(&user, "2026-08-25T12:00:00+00:00")
                .unwrap()
                .is_none()
        );

        db.grant_subscription(
            &Uuid::new_v4().to_string(),
            &user,
            "2027-01-01T00:00:00+00:00",
        )
        .unwrap();
        assert!(
            db.get_active_subscription(&user, "2026-08-25T12:00:00+00:00")
                .unwrap()
                .is_some()
        );
    }

    fn ticket(user_id: &str) -> (TicketRow, TicketMessageRow) {
        let id = Uuid::new_v4().to_string();
        let now = "2026-08-25T10:00:00+00:00".to_string();
        let t = TicketRow {
            id: id.clone(),
            user_id: user_id.to_string(),
            subject: "App crashes on photo upload".to_string(),
            category: "bug_report".to_string(),
            priority: "medium".to_string(),
            status: "open".to_string(),
            last_message_at: now.clone(),
            last_message_by: "user".to_string(),
            user_has_unread: false,
            admin_has_unread: true,
            resolved_at: None,
            closed_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let m = TicketMessageRow {
            id: Uuid::new_v4().to_string(),
            ticket_id: id,
            sender_id: user_id.to_string(),
            sender_role: "user".to_string(),
            body: "It crashes every time.".to_string(),
            created_at: now,
        };
        (t, m)
    }

    #[test]
    fn new_ticket_is_open_with_admin_unread() {
        let db = test_db();
        let user = make_user(&db, "home");
        let (t, m) = ticket(&user);
        db.create_ticket(&t, &m).unwrap();

        let stored = db.get_ticket(&t.id).unwrap().unwrap();
        assert_eq!(stored.status, "open");
        assert!(stored.admin_has_unread);
        assert!(!stored.user_has_unread);
        assert_eq!(db.get_ticket_messages(&t.id).unwrap().len(), 1);
    }

    #[test]
    fn admin_reply_advances_open_ticket_and_flips_unread() {
        let db = test_db();
        let user = make_user(&db, "home");
        let (t, m) = ticket(&user);
        db.create_ticket(&t, &m).unwrap();

        db.append_ticket_message(&TicketMessageRow {
            id: Uuid::new_v4().to_string(),
            ticket_id: t.id.clone(),
            sender_id: "admin-1".to_string(),
            sender_role: "admin".to_string(),
            body: "Which phone model?".to_string(),
            created_at: "2026-08-25T11:00:00+00:00".to_string(),
        })
        .unwrap();

        let stored = db.get_ticket(&t.id).unwrap().unwrap();
        assert_eq!(stored.status, "in_progress");
        assert!(stored.user_has_unread);
        assert!(!stored.admin_has_unread);
        assert_eq!(stored.last_message_by, "admin");
    }

    #[test]
    fn admin_reply_does_not_reopen_resolved_ticket() {
        let db = test_db();
        let user = make_user(&db, "home");
        let (t, m) = ticket(&user);
        db.create_ticket(&t, &m).unwrap();
        db.set_ticket_status(&t.id, "resolved", "2026-08-25T11:00:00+00:00")
            .unwrap();

        db.append_ticket_message(&TicketMessageRow {
            id: Uuid::new_v4().to_string(),
            ticket_id: t.id.clone(),
            sender_id: "admin-1".to_string(),
            sender_role: "admin".to_string(),
            body: "Following up.".to_string(),
            created_at: "2026-08-25T12:00:00+00:00".to_string(),
        })
        .unwrap();

        assert_eq!(db.get_ticket(&t.id).unwrap().unwrap().status, "resolved");
    }

    #[test]
    fn viewer_read_clears_only_their_flag() {
        let db = test_db();
        let user = make_user(&db, "home");
        let (t, m) = ticket(&user);
        db.create_ticket(&t, &m).unwrap();

        db.mark_ticket_read(&t.id, "admin").unwrap();
        let stored = db.get_ticket(&t.id).unwrap().unwrap();
        assert!(!stored.admin_has_unread);
        assert!(!stored.user_has_unread);

        // Admin replies, then the user views the thread.
        db.append_ticket_message(&TicketMessageRow {
            id: Uuid::new_v4().to_string(),
            ticket_id: t.id.clone(),
            sender_id: "admin-1".to_string(),
            sender_role: "admin".to_string(),
            body: "Any update?".to_string(),
            created_at: "2026-08-25T11:00:00+00:00".to_string(),
        })
        .unwrap();
        db.mark_ticket_read(&t.id, "user").unwrap();
        let stored = db.get_ticket(&t.id).unwrap().unwrap();
        assert!(!stored.user_has_unread);
        assert!(!stored.admin_has_unread);
    }

    #[test]
    fn resolved_timestamp_is_stamped_once() {
        let db = test_db();
        let user = make_user(&db, "home");
        let (t, m) = ticket(&user);
        db.create_ticket(&t, &m).unwrap();

        db.set_ticket_status(&t.id, "resolved", "2026-08-25T11:00:00+00:00")
            .unwrap();
        let first = db.get_ticket(&t.id).unwrap().unwrap().resolved_at;
        assert!(first.is_some());

        db.set_ticket_status(&t.id, "open", "2026-08-25T12:00:00+00:00")
            .unwrap();
        db.set_ticket_status(&t.id, "resolved", "2026-08-25T13:00:00+00:00")
            .unwrap();
        let second = db.get_ticket(&t.id).unwrap().unwrap().resolved_at;
        assert_eq!(first, second);
    }

    #[test]
    fn list_filters_and_paginates() {
        let db = test_db();
        let user_a = make_user(&db, "home");
        let user_b = make_user(&db, "home");

        for (user, status) in [(&user_a, "open"), (&user_a, "closed"), (&user_b, "open")] {
            let (mut t, m) = ticket(user);
            t.status = status.to_string();
            db.create_ticket(&t, &m).unwrap();
        }

        let (rows, total) = db
            .list_tickets(
                &TicketFilter {
                    status: Some("open".to_string()),
                    ..Default::default()
                },
                1,
                20,
            )
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);

        let (rows, total) = db
            .list_tickets(
                &TicketFilter {
                    user_id: Some(user_a.clone()),
                    ..Default::default()
                },
                1,
                1,
            )
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 1);

        let (rows, _) = db
            .list_tickets(
                &TicketFilter {
                    search: Some("photo".to_string()),
                    ..Default::default()
                },
                1,
                20,
            )
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn stats_and_unread_counts() {
        let db = test_db();
        let user = make_user(&db, "home");

        let (t1, m1) = ticket(&user);
        db.create_ticket(&t1, &m1).unwrap();
        let (mut t2, m2) = ticket(&user);
        t2.priority = "urgent".to_string();
        db.create_ticket(&t2, &m2).unwrap();

        let stats = db.ticket_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert!(stats.by_status.contains(&("open".to_string(), 2)));
        assert!(stats.by_priority.contains(&("urgent".to_string(), 1)));
        assert!(stats.by_category.contains(&("bug_report".to_string(), 2)));

        assert_eq!(db.admin_unread_count().unwrap(), 2);
        assert_eq!(db.user_unread_count(&user).unwrap(), 0);

        db.mark_ticket_read(&t1.id, "admin").unwrap();
        assert_eq!(db.admin_unread_count().unwrap(), 1);
    }

    #[test]
    fn delete_removes_ticket_and_messages() {
        let db = test_db();
        let user = make_user(&db, "home");
        let (t, m) = ticket(&user);
        db.create_ticket(&t, &m).unwrap();

        assert!(db.delete_ticket(&t.id).unwrap());
        assert!(db.get_ticket(&t.id).unwrap().is_none());
        assert!(db.get_ticket_messages(&t.id).unwrap().is_empty());
        assert!(!db.delete_ticket(&t.id).unwrap());
    }
}
