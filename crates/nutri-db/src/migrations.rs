use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            market      TEXT NOT NULL DEFAULT 'home',
            is_admin    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS app_versions (
            id                  TEXT PRIMARY KEY,
            platform            TEXT NOT NULL CHECK (platform IN ('ios', 'android')),
            version             TEXT NOT NULL,
            build_number        INTEGER NOT NULL CHECK (build_number >= 1),
            min_version         TEXT NOT NULL,
            min_build_number    INTEGER NOT NULL CHECK (min_build_number >= 1),
            is_force_update     INTEGER NOT NULL DEFAULT 0,
            is_optional_update  INTEGER NOT NULL DEFAULT 0,
            update_title        TEXT,
            update_message      TEXT,
            store_url           TEXT,
            is_active           INTEGER NOT NULL DEFAULT 1,
            created_at          TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Single-winner constraint: at most one active gate per platform.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_versions_active
            ON app_versions(platform) WHERE is_active = 1;

        CREATE INDEX IF NOT EXISTS idx_versions_platform
            ON app_versions(platform, build_number);

        CREATE TABLE IF NOT EXISTS daily_analysis_limits (
            user_id         TEXT NOT NULL REFERENCES users(id),
            date            TEXT NOT NULL,
            analysis_count  INTEGER NOT NULL DEFAULT 0 CHECK (analysis_count >= 0),
            UNIQUE(user_id, date)
        );

        CREATE INDEX IF NOT EXISTS idx_limits_date
            ON daily_analysis_limits(date);

        CREATE TABLE IF NOT EXISTS subscriptions (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            is_active   INTEGER NOT NULL DEFAULT 1,
            expires_at  TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_subscriptions_user
            ON subscriptions(user_id, is_active);

        CREATE TABLE IF NOT EXISTS tickets (
            id                TEXT PRIMARY KEY,
            user_id           TEXT NOT NULL REFERENCES users(id),
            subject           TEXT NOT NULL,
            category          TEXT NOT NULL DEFAULT 'general',
            priority          TEXT NOT NULL DEFAULT 'medium',
            status            TEXT NOT NULL DEFAULT 'open',
            last_message_at   TEXT NOT NULL,
            last_message_by   TEXT NOT NULL DEFAULT 'user',
            user_has_unread   INTEGER NOT NULL DEFAULT 0,
            admin_has_unread  INTEGER NOT NULL DEFAULT 1,
            resolved_at       TEXT,
            closed_at         TEXT,
            created_at        TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_tickets_user
            ON tickets(user_id, last_message_at);

        CREATE INDEX IF NOT EXISTS idx_tickets_status
            ON tickets(status);

        CREATE TABLE IF NOT EXISTS ticket_messages (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            ticket_id   TEXT NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
            sender_id   TEXT NOT NULL,
            sender_role TEXT NOT NULL CHECK (sender_role IN ('user', 'admin')),
            body        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ticket_messages_ticket
            ON ticket_messages(ticket_id, seq);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
