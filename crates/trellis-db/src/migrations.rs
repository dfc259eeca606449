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
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per advertised node session; a user may hold several.
        -- Rows live until an explicit logout; there is no expiry.
        CREATE TABLE IF NOT EXISTS peers (
            ip          TEXT NOT NULL,
            port        INTEGER NOT NULL,
            username    TEXT NOT NULL,
            PRIMARY KEY (ip, port)
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            topic       TEXT NOT NULL DEFAULT '',
            owner_id    TEXT NOT NULL REFERENCES users(id),
            is_private  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        -- Membership rows matter only for private channels; the owner is
        -- authorized without one.
        CREATE TABLE IF NOT EXISTS channel_members (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            joined_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_members
            ON channel_members(channel_id, user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            content     TEXT NOT NULL,
            timestamp   TEXT NOT NULL,
            user_id     TEXT NOT NULL REFERENCES users(id),
            channel_id  TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, timestamp);

        CREATE TABLE IF NOT EXISTS direct_messages (
            id          TEXT PRIMARY KEY,
            content     TEXT NOT NULL,
            timestamp   TEXT NOT NULL,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            receiver_id TEXT NOT NULL REFERENCES users(id)
        );

        CREATE INDEX IF NOT EXISTS idx_dm_users
            ON direct_messages(sender_id, receiver_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
